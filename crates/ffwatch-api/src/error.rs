use thiserror::Error;

/// Top-level error type for the `ffwatch-api` crate.
///
/// Covers every wire-level failure mode: HTTP, the STOMP push channel over
/// WebSocket, and the long-poll fallback socket. `ffwatch-core` maps these
/// into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── HTTP ────────────────────────────────────────────────────────
    /// Non-2xx response from the backend.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ── Push channel ────────────────────────────────────────────────
    /// WebSocket connection failed or dropped with an I/O error.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Long-poll fallback socket failed.
    #[error("Long-poll transport error: {0}")]
    LongPoll(String),

    /// Malformed STOMP frame or an ERROR frame from the broker.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::LongPoll(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` for socket-level failures, as opposed to protocol
    /// errors reported by a healthy connection.
    pub fn is_low_level(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout { .. }
                | Self::Tls(_)
                | Self::WebSocketConnect(_)
                | Self::WebSocketClosed { .. }
                | Self::LongPoll(_)
        )
    }

    /// HTTP status code, if the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns `true` if the backend rejected our credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_errors_expose_status() {
        let err = Error::Http {
            status: 404,
            body: "nope".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert!(!err.is_low_level());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Http {
            status: 503,
            body: String::new(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn protocol_errors_are_not_low_level() {
        assert!(!Error::Protocol("bad frame".into()).is_low_level());
        assert!(Error::LongPoll("reset".into()).is_low_level());
        assert!(Error::WebSocketConnect("refused".into()).is_low_level());
    }
}
