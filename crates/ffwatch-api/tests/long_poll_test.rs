#![allow(clippy::unwrap_used)]
// Integration tests for the SockJS long-poll socket using wiremock.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ffwatch_api::stomp::{Command, Frame};
use ffwatch_api::{LongPollFactory, SocketFactory, SocketKind};

const XHR: &str = r"^/iaf/api/ws/\d{3}/[0-9a-f]{32}/xhr$";
const XHR_SEND: &str = r"^/iaf/api/ws/\d{3}/[0-9a-f]{32}/xhr_send$";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Url) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/iaf/api/ws", server.uri())).unwrap();
    (server, base)
}

async fn mount_open(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(XHR))
        .respond_with(ResponseTemplate::new(200).set_body_string("o\n"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
}

async fn mount_idle(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(XHR))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("h\n")
                .set_delay(Duration::from_millis(200)),
        )
        .with_priority(10)
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_and_receive_message_array() {
    let (server, base) = setup().await;
    mount_open(&server).await;

    let message = Frame::new(Command::Message)
        .header("destination", "/event/adapters")
        .header("subscription", "sub-0")
        .body(r#"{"MainConfig/A":null}"#)
        .encode();
    Mock::given(method("POST"))
        .and(path_regex(XHR))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("a{}\n", json!([message]))),
        )
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    mount_idle(&server).await;

    let factory = LongPollFactory::new(reqwest::Client::new());
    assert_eq!(factory.kind(), SocketKind::LongPoll);
    let mut connection = factory.connect(&base).await.unwrap();

    let text = tokio::time::timeout(Duration::from_secs(5), connection.incoming.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame = Frame::decode(&text).unwrap().unwrap();
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.get("destination"), Some("/event/adapters"));
    assert_eq!(frame.body, r#"{"MainConfig/A":null}"#);
}

#[tokio::test]
async fn test_outbound_frames_posted_to_xhr_send() {
    let (server, base) = setup().await;
    mount_open(&server).await;
    mount_idle(&server).await;
    Mock::given(method("POST"))
        .and(path_regex(XHR_SEND))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let factory = LongPollFactory::new(reqwest::Client::new());
    let connection = factory.connect(&base).await.unwrap();
    connection
        .outgoing
        .send(Frame::subscribe("sub-0", "/event/cluster").encode())
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let requests = server.received_requests().await.unwrap();
            if let Some(request) = requests.iter().find(|r| r.url.path().ends_with("/xhr_send")) {
                return String::from_utf8(request.body.clone()).unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let frames: Vec<String> = serde_json::from_str(&body).unwrap();
    assert_eq!(frames.len(), 1);
    let frame = Frame::decode(&frames[0]).unwrap().unwrap();
    assert_eq!(frame.command, Command::Subscribe);
    assert_eq!(frame.get("destination"), Some("/event/cluster"));
}

#[tokio::test]
async fn test_server_close_ends_stream() {
    let (server, base) = setup().await;
    mount_open(&server).await;
    Mock::given(method("POST"))
        .and(path_regex(XHR))
        .respond_with(ResponseTemplate::new(200).set_body_string("c[3000,\"Go away!\"]\n"))
        .with_priority(2)
        .mount(&server)
        .await;

    let factory = LongPollFactory::new(reqwest::Client::new());
    let mut connection = factory.connect(&base).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), connection.incoming.recv())
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_open_rejected_is_low_level() {
    let (server, base) = setup().await;
    Mock::given(method("POST"))
        .and(path_regex(XHR))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let factory = LongPollFactory::new(reqwest::Client::new());
    let Err(err) = factory.connect(&base).await else {
        panic!("expected connect to fail");
    };
    assert!(err.is_low_level(), "got: {err:?}");
}
