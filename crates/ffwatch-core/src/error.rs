// ── Core error types ──
//
// Domain errors from ffwatch-core. Consumers never match on HTTP status
// codes or socket failures directly: the `From<ffwatch_api::Error>` impl
// translates transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to console at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Console disconnected")]
    Disconnected,

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Push channel connectivity or protocol failure.
    #[error("Transport error: {message}")]
    Transport { message: String },

    // ── Sync errors ──────────────────────────────────────────────────
    /// A poll fetch failed (non-2xx status or unparseable body).
    #[error("Poll of {uri} failed: {message}")]
    Poll {
        uri: String,
        message: String,
        status: Option<u16>,
    },

    /// A partial update carried a value that could not be merged. The
    /// offending key is dropped; the rest of the payload still applies.
    #[error("Merge conflict on {kind} '{key}': {reason}")]
    MergeConflict {
        kind: &'static str,
        key: String,
        reason: String,
    },

    /// A poller task stopped permanently after repeated failures.
    #[error("Polling {uri} stopped after {failures} consecutive failures")]
    CircuitOpen { uri: String, failures: usize },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} '{identifier}'")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wrap a failed poll fetch for `uri`.
    pub fn poll(uri: &str, err: &ffwatch_api::Error) -> Self {
        Self::Poll {
            uri: uri.to_owned(),
            message: err.to_string(),
            status: err.status(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ffwatch_api::Error> for CoreError {
    fn from(err: ffwatch_api::Error) -> Self {
        match err {
            ffwatch_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ffwatch_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ffwatch_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            ffwatch_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            ffwatch_api::Error::Http { status, body } => match status {
                401 | 403 => CoreError::AuthenticationFailed { message: body },
                404 => CoreError::NotFound {
                    entity_type: "resource".into(),
                    identifier: body,
                },
                _ => CoreError::Api {
                    message: body,
                    status: Some(status),
                },
            },
            ffwatch_api::Error::WebSocketConnect(reason) => CoreError::Transport {
                message: format!("WebSocket connection failed: {reason}"),
            },
            ffwatch_api::Error::WebSocketClosed { code, reason } => CoreError::Transport {
                message: format!("WebSocket closed (code {code}): {reason}"),
            },
            ffwatch_api::Error::LongPoll(reason) => CoreError::Transport {
                message: format!("Long-poll transport failed: {reason}"),
            },
            ffwatch_api::Error::Protocol(reason) => CoreError::Transport {
                message: format!("Push protocol error: {reason}"),
            },
            ffwatch_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
