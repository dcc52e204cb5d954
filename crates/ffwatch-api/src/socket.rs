//! Socket abstraction beneath the push channel.
//!
//! The push client never touches a concrete socket: it asks a
//! [`SocketFactory`] for a [`SocketConnection`] and exchanges text messages
//! over a pair of channels. Swapping the factory is how the client falls
//! back from a WebSocket to long polling without changing its STOMP logic.
//!
//! Every factory spawns its own pump tasks, so both channel ends are
//! cancel-safe inside `tokio::select!`. Dropping the connection stops them.

use std::collections::VecDeque;
use std::fmt;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::http::BasicAuth;

/// Which kind of socket a factory produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    WebSocket,
    LongPoll,
    /// In-memory or otherwise custom sockets (tests, proxies).
    Custom,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WebSocket => "websocket",
            Self::LongPoll => "long-poll",
            Self::Custom => "custom",
        })
    }
}

// ── SocketConnection ─────────────────────────────────────────────────

/// A connected, message-oriented text socket.
///
/// `incoming` yields `None` once the peer closed cleanly, `Some(Err(_))` on
/// a socket-level failure (after which it closes).
pub struct SocketConnection {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<Result<String, Error>>,
    _guard: DropGuard,
}

impl SocketConnection {
    /// Assemble a connection from channel ends. `cancel` is cancelled when
    /// the connection is dropped, which is how pump tasks learn to stop.
    pub fn new(
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<Result<String, Error>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            _guard: cancel.drop_guard(),
        }
    }
}

/// Opens [`SocketConnection`]s against the push endpoint.
pub trait SocketFactory: Send + Sync {
    fn kind(&self) -> SocketKind;

    /// Connect to the push endpoint rooted at `base`.
    fn connect<'a>(&'a self, base: &'a Url) -> BoxFuture<'a, Result<SocketConnection, Error>>;
}

// ── WebSocket ────────────────────────────────────────────────────────

/// Primary protocol: a raw WebSocket at `{base}/websocket`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory {
    headers: Vec<(String, String)>,
}

impl WebSocketFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject an extra header into the upgrade request (e.g. `Authorization`).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Derive the `ws://` / `wss://` endpoint from the HTTP push base.
    pub fn endpoint(base: &Url) -> Result<Url, Error> {
        let mut url = base.clone();
        let scheme = if base.scheme() == "https" || base.scheme() == "wss" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme).map_err(|()| {
            Error::WebSocketConnect(format!("cannot derive ws scheme from {base}"))
        })?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/websocket"));
        Ok(url)
    }
}

impl SocketFactory for WebSocketFactory {
    fn kind(&self) -> SocketKind {
        SocketKind::WebSocket
    }

    fn connect<'a>(&'a self, base: &'a Url) -> BoxFuture<'a, Result<SocketConnection, Error>> {
        Box::pin(async move {
            let url = Self::endpoint(base)?;
            debug!(url = %url, "opening WebSocket");

            let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
                |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
            )?;
            let mut request = ClientRequestBuilder::new(uri);
            for (name, value) in &self.headers {
                request = request.with_header(name.as_str(), value.as_str());
            }

            let (stream, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            let (mut sink, mut stream) = stream.split();

            let cancel = CancellationToken::new();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel();

            let writer_cancel = cancel.clone();
            let writer_errors = in_tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = writer_cancel.cancelled() => break,
                        text = out_rx.recv() => {
                            let Some(text) = text else { break };
                            let sent = tokio::select! {
                                biased;
                                () = writer_cancel.cancelled() => break,
                                sent = sink.send(tungstenite::Message::text(text)) => sent,
                            };
                            if let Err(e) = sent {
                                let _ = writer_errors.send(Err(Error::WebSocketConnect(e.to_string())));
                                writer_cancel.cancel();
                                break;
                            }
                        }
                    }
                }
                // `incoming` only closes once both pumps released their sender.
                drop(writer_errors);
                let _ = sink.close().await;
            });

            let reader_cancel = cancel.clone();
            tokio::spawn(async move {
                // Stops the writer whenever the reader ends.
                let _stop = reader_cancel.clone().drop_guard();
                loop {
                    tokio::select! {
                        biased;
                        () = reader_cancel.cancelled() => break,
                        frame = stream.next() => {
                            let item = match frame {
                                Some(Ok(tungstenite::Message::Text(text))) => Ok(text.as_str().to_owned()),
                                Some(Ok(tungstenite::Message::Close(Some(cf))))
                                    if u16::from(cf.code) != 1000 =>
                                {
                                    let _ = in_tx.send(Err(Error::WebSocketClosed {
                                        code: cf.code.into(),
                                        reason: cf.reason.as_str().to_owned(),
                                    }));
                                    break;
                                }
                                // Clean close or stream end: dropping `in_tx` signals it.
                                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                                Some(Ok(tungstenite::Message::Ping(_))) => {
                                    // tungstenite queues the pong automatically
                                    trace!("WebSocket ping");
                                    continue;
                                }
                                // Binary, Pong, Frame -- ignore
                                Some(Ok(_)) => continue,
                                Some(Err(e)) => Err(Error::WebSocketConnect(e.to_string())),
                            };
                            let failed = item.is_err();
                            if in_tx.send(item).is_err() || failed {
                                break;
                            }
                        }
                    }
                }
            });

            Ok(SocketConnection::new(out_tx, in_rx, cancel))
        })
    }
}

// ── Long polling ─────────────────────────────────────────────────────

/// Fallback protocol: SockJS `xhr-polling`.
///
/// Each session lives at `{base}/{server}/{session}/`. Inbound frames are
/// fetched by repeatedly POSTing to `xhr`; outbound frames are POSTed to
/// `xhr_send` as a JSON array of strings.
#[derive(Clone)]
pub struct LongPollFactory {
    http: reqwest::Client,
    auth: Option<BasicAuth>,
}

impl LongPollFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http, auth: None }
    }

    pub fn with_basic_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    fn session_url(base: &Url) -> Url {
        let id = Uuid::new_v4();
        let server = id.as_u128() % 1000;
        let path = base.path().trim_end_matches('/').to_owned();
        let mut url = base.clone();
        url.set_path(&format!("{path}/{server:03}/{}/", id.simple()));
        url
    }
}

/// One parsed SockJS payload.
#[derive(Debug, PartialEq, Eq)]
enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

fn parse_sockjs(body: &str) -> Result<SockJsFrame, Error> {
    let body = body.trim_end();
    let mut chars = body.chars();
    match chars.next() {
        Some('o') => Ok(SockJsFrame::Open),
        Some('h') => Ok(SockJsFrame::Heartbeat),
        Some('a') => serde_json::from_str::<Vec<String>>(chars.as_str())
            .map(SockJsFrame::Messages)
            .map_err(|e| Error::LongPoll(format!("bad message array: {e}"))),
        Some('c') => {
            let (code, reason): (u16, String) = serde_json::from_str(chars.as_str())
                .map_err(|e| Error::LongPoll(format!("bad close frame: {e}")))?;
            Ok(SockJsFrame::Close { code, reason })
        }
        _ => Err(Error::LongPoll(format!("unexpected payload '{body}'"))),
    }
}

/// HTTP side of one long-poll session, shared by the reader and writer pumps.
#[derive(Clone)]
struct LongPollSession {
    http: reqwest::Client,
    auth: Option<BasicAuth>,
    url: Url,
}

impl LongPollSession {
    async fn post(&self, endpoint: &str, body: Option<String>) -> Result<String, Error> {
        let url = self.url.join(endpoint)?;
        let mut request = self.http.post(url);
        if let Some(ref auth) = self.auth {
            request = request.basic_auth(&auth.username, Some(auth.password.expose_secret()));
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
                .body(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::LongPoll(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::LongPoll(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::LongPoll(format!(
                "{endpoint} returned HTTP {status}"
            )));
        }
        Ok(text)
    }

    /// Poll `xhr` until the server closes the session or the socket fails.
    async fn read_loop(
        self,
        in_tx: mpsc::UnboundedSender<Result<String, Error>>,
        cancel: CancellationToken,
    ) {
        // Stops the writer whenever the reader ends.
        let _stop = cancel.clone().drop_guard();
        let mut pending: VecDeque<String> = VecDeque::new();
        loop {
            while let Some(message) = pending.pop_front() {
                if in_tx.send(Ok(message)).is_err() {
                    return;
                }
            }

            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                body = self.post("xhr", None) => body,
            };
            let parsed = body.and_then(|b| parse_sockjs(&b));
            match parsed {
                Ok(SockJsFrame::Open | SockJsFrame::Heartbeat) => trace!("long-poll heartbeat"),
                Ok(SockJsFrame::Messages(messages)) => pending.extend(messages),
                Ok(SockJsFrame::Close { code, reason }) => {
                    debug!(code, reason = %reason, "long-poll session closed by server");
                    return;
                }
                Err(e) => {
                    let _ = in_tx.send(Err(e));
                    return;
                }
            }
        }
    }

    async fn write_loop(
        self,
        mut out_rx: mpsc::UnboundedReceiver<String>,
        in_tx: mpsc::UnboundedSender<Result<String, Error>>,
        cancel: CancellationToken,
    ) {
        loop {
            let text = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                text = out_rx.recv() => match text {
                    Some(text) => text,
                    None => return,
                },
            };
            let sent = match serde_json::to_string(&[text]) {
                Ok(body) => tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    sent = self.post("xhr_send", Some(body)) => sent.map(drop),
                },
                Err(e) => Err(Error::LongPoll(e.to_string())),
            };
            if let Err(e) = sent {
                let _ = in_tx.send(Err(e));
                cancel.cancel();
                return;
            }
        }
    }
}

impl SocketFactory for LongPollFactory {
    fn kind(&self) -> SocketKind {
        SocketKind::LongPoll
    }

    fn connect<'a>(&'a self, base: &'a Url) -> BoxFuture<'a, Result<SocketConnection, Error>> {
        Box::pin(async move {
            let session = LongPollSession {
                http: self.http.clone(),
                auth: self.auth.clone(),
                url: Self::session_url(base),
            };
            debug!(url = %session.url, "opening long-poll session");

            match parse_sockjs(&session.post("xhr", None).await?)? {
                SockJsFrame::Open => {}
                other => {
                    return Err(Error::LongPoll(format!(
                        "expected open frame, got {other:?}"
                    )));
                }
            }

            let cancel = CancellationToken::new();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();

            tokio::spawn(
                session
                    .clone()
                    .write_loop(out_rx, in_tx.clone(), cancel.clone()),
            );
            tokio::spawn(session.read_loop(in_tx, cancel.clone()));

            Ok(SocketConnection::new(out_tx, in_rx, cancel))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn websocket_endpoint_switches_scheme() {
        let base = Url::parse("https://host:8443/iaf/api/ws").unwrap();
        let url = WebSocketFactory::endpoint(&base).unwrap();
        assert_eq!(url.as_str(), "wss://host:8443/iaf/api/ws/websocket");

        let base = Url::parse("http://localhost/ws/").unwrap();
        let url = WebSocketFactory::endpoint(&base).unwrap();
        assert_eq!(url.as_str(), "ws://localhost/ws/websocket");
    }

    #[test]
    fn session_url_has_server_and_session_segments() {
        let base = Url::parse("http://localhost/iaf/api/ws").unwrap();
        let url = LongPollFactory::session_url(&base);
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        // iaf / api / ws / server / session / ""
        assert_eq!(segments.len(), 6);
        assert_eq!(segments[3].len(), 3);
        assert_eq!(segments[4].len(), 32);
        assert_eq!(segments[5], "");
    }

    #[test]
    fn parse_sockjs_payloads() {
        assert_eq!(parse_sockjs("o\n").unwrap(), SockJsFrame::Open);
        assert_eq!(parse_sockjs("h\n").unwrap(), SockJsFrame::Heartbeat);
        assert_eq!(
            parse_sockjs("a[\"one\",\"two\"]\n").unwrap(),
            SockJsFrame::Messages(vec!["one".into(), "two".into()])
        );
        assert_eq!(
            parse_sockjs("c[3000,\"Go away!\"]\n").unwrap(),
            SockJsFrame::Close {
                code: 3000,
                reason: "Go away!".into()
            }
        );
        assert!(parse_sockjs("x").is_err());
        assert!(parse_sockjs("a[not json").is_err());
    }
}
