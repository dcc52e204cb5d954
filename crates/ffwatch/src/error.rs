//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ffwatch_config::ConfigError;
use ffwatch_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to console at {url}")]
    #[diagnostic(
        code(ffwatch::connection_failed),
        help(
            "Check that the console is running and reachable.\n\
             Reason: {reason}\n\
             Self-signed certificate? Try --insecure (-k)."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Lost the connection to the console")]
    #[diagnostic(code(ffwatch::disconnected))]
    Disconnected,

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(ffwatch::timeout),
        help("Raise `timeout` in your profile or check console responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(ffwatch::auth_failed),
        help(
            "Verify the profile's username and password.\n\
             Store a password with: ffwatch config set-password --profile <name>"
        )
    )]
    AuthFailed { message: String },

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(ffwatch::no_credentials),
        help(
            "Set FFWATCH_PASSWORD, add `password_env` to the profile,\n\
             or run: ffwatch config set-password --profile {profile}"
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(ffwatch::not_found),
        help("Run: ffwatch status to see the available adapters")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("Console API error: {message}")]
    #[diagnostic(code(ffwatch::api_error))]
    ApiError { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ffwatch::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(ffwatch::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No console configured")]
    #[diagnostic(
        code(ffwatch::no_config),
        help(
            "Pass --url (or set FFWATCH_URL), or add a profile to\n\
             {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(ffwatch::config))]
    Config { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(ffwatch::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(ffwatch::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Disconnected => Self::Disconnected,
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Transport { message } => Self::ConnectionFailed {
                url: "(push channel)".into(),
                reason: message,
            },
            CoreError::CircuitOpen { uri, failures } => Self::ConnectionFailed {
                url: uri,
                reason: format!("gave up after {failures} failed polls"),
            },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => Self::NotFound {
                resource_type: entity_type,
                identifier,
            },
            CoreError::Poll { uri, message, .. } => Self::ApiError {
                message: format!("{uri}: {message}"),
            },
            CoreError::Api { message, status } => Self::ApiError {
                message: match status {
                    Some(status) => format!("{message} (HTTP {status})"),
                    None => message,
                },
            },
            CoreError::Config { message } => Self::Config { message },
            err @ CoreError::MergeConflict { .. } => Self::Internal(err.to_string()),
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
