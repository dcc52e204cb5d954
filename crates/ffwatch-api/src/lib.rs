// ffwatch-api: Async transport for a framework management console (REST + STOMP push)

pub mod error;
pub mod http;
pub mod push;
pub mod socket;
pub mod stomp;

pub use error::Error;
pub use http::{ApiClient, BasicAuth, HttpConfig, TlsMode};
pub use push::{
    ConnectivityAlert, FallbackMachine, LifecycleEvent, ProtocolState, PushClient, PushConfig,
    ReconnectConfig, Subscription,
};
pub use socket::{LongPollFactory, SocketConnection, SocketFactory, SocketKind, WebSocketFactory};
