// ── Runtime console configuration ──
//
// These types describe *how* to reach a console backend and how the sync
// engine is tuned. They carry credential data but never touch disk: the
// binary builds a `ConsoleConfig` (usually through ffwatch-config) and
// hands it in.

use std::path::PathBuf;
use std::time::Duration;

use ffwatch_api::{ReconnectConfig, TlsMode};
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Basic-auth credentials for the console API.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed development servers).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Trailing debounce with a max-wait ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// How long a deferred run waits after the latest request.
    pub delay: Duration,
    /// Requests this long after the last real run execute immediately.
    pub max_wait: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_wait: Duration::from_secs(3),
        }
    }
}

/// Configuration for one console backend.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Console root URL (e.g. `https://host:8080`).
    pub url: Url,
    /// REST API path below `url`. Default: `/iaf/api`.
    pub api_path: String,
    /// Push endpoint path below `url`. Default: `/iaf/api/ws`.
    pub push_path: String,
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
    /// Use the push channel. When disabled, polling is the only input.
    pub push_enabled: bool,
    /// How long the long-poll fallback may try before the channel fails.
    pub fallback_timeout: Duration,
    /// Consecutive socket errors that trigger the long-poll fallback.
    pub fallback_error_threshold: u32,
    pub reconnect: ReconnectConfig,
    /// Interval for fallback pollers.
    pub poll_interval: Duration,
    /// Maximum messages kept per adapter / configuration.
    pub message_cap: usize,
    pub summary: DebounceConfig,
}

impl ConsoleConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            api_path: "/iaf/api".into(),
            push_path: "/iaf/api/ws".into(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            credentials: None,
            push_enabled: true,
            fallback_timeout: Duration::from_secs(20),
            fallback_error_threshold: 2,
            reconnect: ReconnectConfig::default(),
            poll_interval: Duration::from_secs(3),
            message_cap: 10,
            summary: DebounceConfig::default(),
        }
    }

    /// Base URL for REST calls.
    pub fn api_url(&self) -> Result<Url, CoreError> {
        self.join(&self.api_path)
    }

    /// Root of the push endpoint.
    pub fn push_url(&self) -> Result<Url, CoreError> {
        self.join(&self.push_path)
    }

    fn join(&self, path: &str) -> Result<Url, CoreError> {
        let mut url = self.url.clone();
        let root = url.path().trim_end_matches('/').to_owned();
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Ok(url);
        }
        url.set_path(&format!("{root}/{path}"));
        if url.cannot_be_a_base() {
            return Err(CoreError::Config {
                message: format!("'{}' cannot be used as a base URL", self.url),
            });
        }
        Ok(url)
    }
}
