//! CLI configuration: thin wrapper around `iotdeck_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides (`--config`,
//! `--profile`, `--secret`).

use std::path::PathBuf;

use secrecy::SecretString;

use iotdeck_config::ConfigError;
use iotdeck_core::HubConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use iotdeck_config::{Config, Profile, save_config_to, store_signing_secret};

/// Config file path: `--config` flag, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(iotdeck_config::config_path)
}

/// Load the config file, falling back to defaults when it is absent.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    if !path.exists() {
        return Ok(Config::default());
    }
    Ok(iotdeck_config::load_config_from(&path)?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Look up the active profile.
///
/// An explicitly requested profile must exist; an implicit default that is
/// missing from the file falls back to an empty profile.
pub fn active_profile(global: &GlobalOpts, config: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, config);
    match config.profile(Some(&name)) {
        Ok((name, profile)) => Ok((name, profile.clone())),
        Err(ConfigError::UnknownProfile { profile }) if global.profile.is_some() => {
            Err(CliError::ProfileNotFound {
                name: profile,
                available: available_profiles(config),
            })
        }
        Err(_) => Ok((name, Profile::default())),
    }
}

fn available_profiles(config: &Config) -> String {
    let mut names: Vec<_> = config.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

/// Resolve the signing secret: `--secret` flag first, then the profile.
pub fn signing_secret(global: &GlobalOpts, profile: &Profile, name: &str) -> Result<SecretString, CliError> {
    if let Some(ref secret) = global.secret {
        return Ok(SecretString::from(secret.clone()));
    }
    Ok(iotdeck_config::resolve_signing_secret(profile, name)?)
}

/// Build the `HubConfig` for the active profile.
///
/// With `require_secret` unset a missing secret degrades to an empty one,
/// which is enough for hubs that never talk to real devices.
pub fn hub_config(global: &GlobalOpts, require_secret: bool) -> Result<HubConfig, CliError> {
    let config = load(global)?;
    let (name, profile) = active_profile(global, &config)?;
    let secret = match signing_secret(global, &profile, &name) {
        Ok(secret) => secret,
        Err(CliError::NoSecret { .. }) if !require_secret => {
            tracing::debug!(profile = %name, "no signing secret, signing with an empty key");
            SecretString::from(String::new())
        }
        Err(e) => return Err(e),
    };
    Ok(iotdeck_config::hub_config(&profile, secret)?)
}
