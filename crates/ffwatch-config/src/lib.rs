//! Configuration for the ffwatch monitor.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `ffwatch_core::ConsoleConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ffwatch_core::{ConsoleConfig, Credentials, TlsVerification};

const KEYRING_SERVICE: &str = "ffwatch";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named console profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::Validation {
                field: "profile".into(),
                reason: format!("no profile named '{name}'"),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Use the push channel.
    #[serde(default = "default_push")]
    pub push: bool,

    /// Fallback poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Messages kept per adapter.
    #[serde(default = "default_message_cap")]
    pub message_cap: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            push: default_push(),
            poll_interval: default_poll_interval(),
            message_cap: default_message_cap(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_push() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    3
}
fn default_message_cap() -> usize {
    10
}

/// A named console profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Console root URL (e.g., "https://console.example.com:8080").
    pub url: String,

    /// REST API path below `url`.
    pub api_path: Option<String>,

    /// Push endpoint path below `url`.
    pub push_path: Option<String>,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Look the password up in the system keyring. Default: true.
    pub keyring: Option<bool>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,
    pub timeout: Option<u64>,
    pub push: Option<bool>,
    pub poll_interval: Option<u64>,

    /// Seconds the long-poll fallback may try before giving up.
    pub fallback_timeout: Option<u64>,

    pub message_cap: Option<usize>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "ffwatch", "ffwatch").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ffwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `FFWATCH_` environment variables
/// (`FFWATCH_DEFAULTS__TIMEOUT=5`). A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FFWATCH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve basic-auth credentials for a profile.
///
/// No username means an unauthenticated console (`Ok(None)`). The password
/// comes from, in order: the profile's `password_env` variable,
/// `FFWATCH_PASSWORD`, the system keyring, the plaintext `password`.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<Credentials>, ConfigError> {
    let Some(username) = profile
        .username
        .clone()
        .or_else(|| std::env::var("FFWATCH_USERNAME").ok())
    else {
        return Ok(None);
    };

    let password = resolve_password(profile, profile_name).ok_or_else(|| {
        ConfigError::NoCredentials {
            profile: profile_name.into(),
        }
    })?;
    Ok(Some(Credentials { username, password }))
}

fn resolve_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's password_env, then the global variable
    let from_env = profile
        .password_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| std::env::var("FFWATCH_PASSWORD").ok());
    if let Some(pw) = from_env {
        return Some(SecretString::from(pw));
    }

    // 2. System keyring
    if profile.keyring.unwrap_or(true) {
        if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password")) {
            if let Ok(pw) = entry.get_password() {
                return Some(SecretString::from(pw));
            }
        }
    }

    // 3. Plaintext in config
    profile.password.clone().map(SecretString::from)
}

/// Store a profile password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ConsoleConfig` from a profile, filling gaps from `defaults`.
pub fn profile_to_console_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ConsoleConfig, ConfigError> {
    let url: url::Url = profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected an http(s) URL, got '{}'", url.scheme()),
        });
    }

    let mut config = ConsoleConfig::new(url);
    config.credentials = resolve_credentials(profile, profile_name)?;

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    if let Some(ref api_path) = profile.api_path {
        config.api_path.clone_from(api_path);
    }
    if let Some(ref push_path) = profile.push_path {
        config.push_path.clone_from(push_path);
    }
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.push_enabled = profile.push.unwrap_or(defaults.push);
    config.poll_interval =
        Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval));
    if let Some(secs) = profile.fallback_timeout {
        config.fallback_timeout = Duration::from_secs(secs);
    }

    let message_cap = profile.message_cap.unwrap_or(defaults.message_cap);
    if message_cap == 0 {
        return Err(ConfigError::Validation {
            field: "message_cap".into(),
            reason: "must be at least 1".into(),
        });
    }
    config.message_cap = message_cap;

    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "prod"

[defaults]
timeout = 15
poll_interval = 5

[profiles.prod]
url = "https://console.example.com:8443"
username = "monitor"
password = "hunter2"
keyring = false
push = false

[profiles.lab]
url = "http://lab.local:8080"
api_path = "/api"
insecure = true
message_cap = 25
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_profiles_and_defaults() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();

        assert_eq!(config.default_profile.as_deref(), Some("prod"));
        assert_eq!(config.defaults.timeout, 15);
        assert_eq!(config.defaults.poll_interval, 5);
        assert!(config.defaults.push);
        assert_eq!(config.profiles.len(), 2);

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "prod");
        assert_eq!(profile.username.as_deref(), Some("monitor"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
        assert!(config.profile(None).is_err());
    }

    #[test]
    fn profile_translates_to_console_config() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();
        let (name, profile) = config.profile(Some("prod")).unwrap();

        let console = profile_to_console_config(profile, name, &config.defaults).unwrap();
        assert_eq!(console.url.as_str(), "https://console.example.com:8443/");
        assert_eq!(console.api_path, "/iaf/api");
        assert_eq!(console.timeout, Duration::from_secs(15));
        assert_eq!(console.poll_interval, Duration::from_secs(5));
        assert!(!console.push_enabled);
        assert_eq!(console.tls, TlsVerification::SystemDefaults);
        assert_eq!(console.message_cap, 10);
    }

    #[test]
    fn plaintext_password_is_last_resort() {
        let profile = Profile {
            url: "https://console".into(),
            username: Some("monitor".into()),
            password: Some("hunter2".into()),
            password_env: Some("FFWATCH_TEST_UNSET_PASSWORD_VARIABLE".into()),
            keyring: Some(false),
            ..Profile::default()
        };
        // Only holds when FFWATCH_PASSWORD is not set in the test environment.
        if std::env::var("FFWATCH_PASSWORD").is_err() {
            let credentials = resolve_credentials(&profile, "prod").unwrap().unwrap();
            assert_eq!(credentials.username, "monitor");
            assert_eq!(credentials.password.expose_secret(), "hunter2");
        }
    }

    #[test]
    fn lab_profile_overrides() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();
        let (name, profile) = config.profile(Some("lab")).unwrap();

        let console = profile_to_console_config(profile, name, &config.defaults).unwrap();
        assert_eq!(console.api_path, "/api");
        assert_eq!(console.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(console.message_cap, 25);
        assert!(console.push_enabled);
    }

    #[test]
    fn bad_urls_are_rejected() {
        let defaults = Defaults::default();
        for url in ["not a url", "ftp://console"] {
            let profile = Profile {
                url: url.into(),
                ..Profile::default()
            };
            assert!(matches!(
                profile_to_console_config(&profile, "x", &defaults),
                Err(ConfigError::Validation { .. })
            ));
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                url: "https://console".into(),
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["default"].url, "https://console");
    }
}
