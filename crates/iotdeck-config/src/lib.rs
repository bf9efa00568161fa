//! Shared configuration for the iotdeck CLI and embedders.
//!
//! TOML profiles, signing-secret resolution (env + keyring + plaintext),
//! and translation to `iotdeck_core::HubConfig`. The core never reads
//! files; everything disk-related lives here.

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

use iotdeck_core::{
    BackoffConfig, CommandConfig, HubConfig, LivenessConfig, TelemetryConfig, TlsMode,
    TransportConfig,
};

const KEYRING_SERVICE: &str = "iotdeck";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no signing secret configured for profile '{profile}'")]
    NoSecret { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

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

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named hub profiles.
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
    /// A starter config with one `default` profile.
    pub fn starter() -> Self {
        let mut config = Self::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                signing_secret_env: Some("IOTDECK_SIGNING_SECRET".into()),
                ..Profile::default()
            },
        );
        config
    }

    /// Look up a profile by name, or the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        self.profiles
            .get(&name)
            .map(|p| (name.clone(), p))
            .ok_or(ConfigError::UnknownProfile { profile: name })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// A named hub profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Shared signing secret (plaintext; prefer keyring or env var).
    pub signing_secret: Option<String>,

    /// Environment variable name containing the signing secret.
    pub signing_secret_env: Option<String>,

    /// Accept self-signed device certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Upper bound for any single HTTP request, in seconds.
    pub request_timeout: Option<u64>,

    #[serde(default)]
    pub hub: HubSettings,
}

/// Hub tuning. Every field falls back to the core default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HubSettings {
    pub telemetry_capacity: Option<usize>,
    pub telemetry_max_age_secs: Option<u64>,
    pub dead_letter_capacity: Option<usize>,
    pub liveness_window_secs: Option<u64>,
    /// Zero disables the background sweep.
    pub liveness_sweep_secs: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub backoff_max_ms: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "iotdeck", "iotdeck").map_or_else(
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
    p.push("iotdeck");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load Config from `path` merged with `IOTDECK_`-prefixed environment
/// variables (`__` separates nesting, e.g. `IOTDECK_DEFAULTS__OUTPUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("IOTDECK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// Resolve the signing secret: named env var, then system keyring, then
/// plaintext in the profile.
pub fn resolve_signing_secret(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's signing_secret_env → env var lookup
    if let Some(ref env_name) = profile.signing_secret_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/signing-secret")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref secret) = profile.signing_secret {
        return Ok(SecretString::from(secret.clone()));
    }

    Err(ConfigError::NoSecret {
        profile: profile_name.into(),
    })
}

/// Store a signing secret in the system keyring for `profile_name`.
pub fn store_signing_secret(profile_name: &str, secret: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/signing-secret"))
        .map_err(|e| invalid("keyring", e.to_string()))?;
    entry
        .set_password(secret)
        .map_err(|e| invalid("keyring", e.to_string()))
}

// ── HubConfig translation ───────────────────────────────────────────

/// Build a `HubConfig` from a profile and an already-resolved secret.
pub fn hub_config(profile: &Profile, signing_secret: SecretString) -> Result<HubConfig, ConfigError> {
    let defaults = HubConfig::default();
    let s = &profile.hub;

    let capacity = s.telemetry_capacity.unwrap_or(defaults.telemetry.capacity);
    if capacity == 0 {
        return Err(invalid("hub.telemetry_capacity", "must be at least 1"));
    }
    let max_retries = s.max_retries.unwrap_or(defaults.commands.default_max_retries);
    if max_retries == 0 {
        return Err(invalid("hub.max_retries", "must be at least 1"));
    }
    let multiplier = s.backoff_multiplier.unwrap_or(defaults.commands.backoff.multiplier);
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(invalid(
            "hub.backoff_multiplier",
            format!("must be a finite number >= 1.0, got {multiplier}"),
        ));
    }
    let window = s
        .liveness_window_secs
        .map_or(defaults.liveness.window, Duration::from_secs);
    if window.is_zero() {
        return Err(invalid("hub.liveness_window_secs", "must be positive"));
    }
    let command_timeout = s
        .command_timeout_ms
        .map_or(defaults.commands.timeout, Duration::from_millis);
    if command_timeout.is_zero() {
        return Err(invalid("hub.command_timeout_ms", "must be positive"));
    }

    let tls = if profile.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    Ok(HubConfig {
        telemetry: TelemetryConfig {
            capacity,
            max_age: s.telemetry_max_age_secs.map(Duration::from_secs),
            dead_letter_capacity: s
                .dead_letter_capacity
                .unwrap_or(defaults.telemetry.dead_letter_capacity),
        },
        liveness: LivenessConfig {
            window,
            sweep_interval: s
                .liveness_sweep_secs
                .map_or(defaults.liveness.sweep_interval, Duration::from_secs),
        },
        commands: CommandConfig {
            timeout: command_timeout,
            default_max_retries: max_retries,
            backoff: BackoffConfig {
                initial: s
                    .backoff_initial_ms
                    .map_or(defaults.commands.backoff.initial, Duration::from_millis),
                multiplier,
                max: s
                    .backoff_max_ms
                    .map_or(defaults.commands.backoff.max, Duration::from_millis),
            },
            ..defaults.commands
        },
        signing_secret,
        transport: TransportConfig {
            tls,
            timeout: profile
                .request_timeout
                .map_or(defaults.transport.timeout, Duration::from_secs),
        },
        event_buffer: defaults.event_buffer,
    })
}

/// Build a `HubConfig` from a profile, resolving its signing secret.
pub fn profile_to_hub_config(profile: &Profile, profile_name: &str) -> Result<HubConfig, ConfigError> {
    let secret = resolve_signing_secret(profile, profile_name)?;
    hub_config(profile, secret)
}
