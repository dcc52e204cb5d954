#![allow(clippy::unwrap_used)]
// Integration tests for the WebSocket socket against a local tungstenite server.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use ffwatch_api::{Error, SocketConnection, SocketFactory, SocketKind, WebSocketFactory};

// ── Helpers ─────────────────────────────────────────────────────────

/// Accept one WebSocket client and hand it to `handler`.
async fn serve_once<F, Fut>(handler: F) -> Url
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    Url::parse(&format!("http://{addr}/iaf/api/ws")).unwrap()
}

async fn next(connection: &mut SocketConnection) -> Option<Result<String, Error>> {
    tokio::time::timeout(Duration::from_secs(5), connection.incoming.recv())
        .await
        .expect("incoming stayed open")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clean_close_ends_stream() {
    let base = serve_once(|mut ws| async move {
        ws.send(Message::text("hello")).await.unwrap();
        ws.close(None).await.unwrap();
        while ws.next().await.is_some() {}
    })
    .await;

    let factory = WebSocketFactory::new();
    assert_eq!(factory.kind(), SocketKind::WebSocket);
    let mut connection = factory.connect(&base).await.unwrap();

    assert_eq!(next(&mut connection).await.unwrap().unwrap(), "hello");
    assert!(next(&mut connection).await.is_none());
}

#[tokio::test]
async fn test_abnormal_close_reports_code_then_ends() {
    let base = serve_once(|mut ws| async move {
        let frame = CloseFrame {
            code: CloseCode::from(4000),
            reason: "going away".into(),
        };
        ws.close(Some(frame)).await.unwrap();
        while ws.next().await.is_some() {}
    })
    .await;

    let mut connection = WebSocketFactory::new().connect(&base).await.unwrap();

    match next(&mut connection).await {
        Some(Err(Error::WebSocketClosed { code, reason })) => {
            assert_eq!(code, 4000);
            assert_eq!(reason, "going away");
        }
        other => panic!("expected close error, got {other:?}"),
    }
    assert!(next(&mut connection).await.is_none());
}

#[tokio::test]
async fn test_dropped_tcp_ends_stream() {
    let base = serve_once(|ws| async move { drop(ws) }).await;

    let mut connection = WebSocketFactory::new().connect(&base).await.unwrap();

    // A reset without handshake may surface as one error before the end.
    let mut items = 0;
    while next(&mut connection).await.is_some() {
        items += 1;
        assert!(items <= 1, "more than one item after reset");
    }
}

#[tokio::test]
async fn test_outgoing_still_open_after_peer_close() {
    let base = serve_once(|mut ws| async move {
        ws.close(None).await.unwrap();
        while ws.next().await.is_some() {}
    })
    .await;

    let mut connection = WebSocketFactory::new().connect(&base).await.unwrap();
    assert!(next(&mut connection).await.is_none());
    // Holding the sender must not keep `incoming` alive.
    let _ = connection.outgoing.send("late".into());
    assert!(next(&mut connection).await.is_none());
}
