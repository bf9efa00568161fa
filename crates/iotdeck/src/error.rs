//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use iotdeck_config::ConfigError;
use iotdeck_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Delivery ─────────────────────────────────────────────────────
    #[error("Device {device} is unreachable: {reason}")]
    #[diagnostic(
        code(iotdeck::unreachable),
        help("Check that the device is powered and its address is correct.")
    )]
    Unreachable { device: String, reason: String },

    #[error("Device rejected the request signature")]
    #[diagnostic(
        code(iotdeck::auth_rejected),
        help(
            "The device and the hub disagree on the shared secret.\n\
             Set it with --secret, IOTDECK_SECRET, or: iotdeck config set-secret"
        )
    )]
    AuthRejected,

    #[error("Command {command} ended as {status}")]
    #[diagnostic(code(iotdeck::command_failed), help("{detail}"))]
    CommandFailed {
        command: String,
        status: String,
        detail: String,
    },

    #[error("Timed out after {millis}ms")]
    #[diagnostic(
        code(iotdeck::timeout),
        help("Raise hub.command_timeout_ms in your profile or check the device.")
    )]
    Timeout { millis: u64 },

    // ── Entities ─────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(code(iotdeck::not_found))]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("{resource_type} '{identifier}' already exists")]
    #[diagnostic(code(iotdeck::conflict))]
    Conflict {
        resource_type: String,
        identifier: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(iotdeck::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No signing secret configured for profile '{profile}'")]
    #[diagnostic(
        code(iotdeck::no_secret),
        help(
            "Pass --secret, export IOTDECK_SECRET, or run: iotdeck config set-secret"
        )
    )]
    NoSecret { profile: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(iotdeck::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: iotdeck config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(iotdeck::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(iotdeck::config))]
    Config(Box<ConfigError>),

    // ── Hub ──────────────────────────────────────────────────────────
    #[error("Hub error: {0}")]
    #[diagnostic(code(iotdeck::hub))]
    Hub(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(iotdeck::json), help("Check the JSON contents and try again."))]
    Json(#[from] serde_json::Error),

    #[error("Invalid scenario file: {0}")]
    #[diagnostic(code(iotdeck::scenario))]
    Toml(#[from] toml::de::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::AuthRejected | Self::NoSecret { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                resource_type: entity_type.into(),
                identifier,
            },
            CoreError::Duplicate {
                entity_type,
                identifier,
            } => CliError::Conflict {
                resource_type: entity_type.into(),
                identifier,
            },
            CoreError::DeviceUnreachable { device_id, reason } => CliError::Unreachable {
                device: device_id,
                reason,
            },
            CoreError::AuthRejected { .. } => CliError::AuthRejected,
            CoreError::Timeout { timeout_ms } => CliError::Timeout { millis: timeout_ms },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            other => CliError::Hub(other.to_string()),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoSecret { profile } => CliError::NoSecret { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(Box::new(other)),
        }
    }
}
