//! Profile resolution and CLI overrides.

use std::path::PathBuf;

use ffwatch_config::{Config, Profile};
use ffwatch_core::{ConsoleConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(ffwatch_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(ffwatch_config::load_config_from(&config_file(global))?)
}

pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `ConsoleConfig` from the config file, profile, and CLI overrides.
pub fn build_console_config(global: &GlobalOpts) -> Result<ConsoleConfig, CliError> {
    let cfg = load(global)?;
    let profile_name = active_profile_name(global, &cfg);

    let mut config = if let Some(profile) = cfg.profiles.get(&profile_name) {
        let mut config =
            ffwatch_config::profile_to_console_config(profile, &profile_name, &cfg.defaults)?;
        if let Some(ref url) = global.url {
            config.url = parse_url(url)?;
        }
        config
    } else if global.profile.is_some() {
        let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: if available.is_empty() {
                "(none)".into()
            } else {
                available.join(", ")
            },
        });
    } else {
        // No profile: the URL alone, credentials from the environment
        let url = global.url.clone().ok_or_else(|| CliError::NoConfig {
            path: config_file(global).display().to_string(),
        })?;
        let profile = Profile {
            url,
            keyring: Some(false),
            ..Profile::default()
        };
        ffwatch_config::profile_to_console_config(&profile, &profile_name, &cfg.defaults)?
    };

    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if global.no_push {
        config.push_enabled = false;
    }
    Ok(config)
}

fn parse_url(url: &str) -> Result<url::Url, CliError> {
    url.parse().map_err(|_| CliError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {url}"),
    })
}
