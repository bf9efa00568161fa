// ── Core error types ──
//
// User-facing errors from iotdeck-core. Consumers never see reqwest
// errors or raw JSON failures; `From<iotdeck_api::Error>` translates
// transport-layer errors into domain variants.

use thiserror::Error;

use crate::model::{EntityId, InvalidTransition};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    /// Malformed command, rule or telemetry input. Nothing was changed.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    #[error("Duplicate {entity_type} id: {identifier}")]
    Duplicate {
        entity_type: &'static str,
        identifier: String,
    },

    // ── Dispatch errors ──────────────────────────────────────────────
    #[error("Device {device_id} unreachable: {reason}")]
    DeviceUnreachable { device_id: String, reason: String },

    #[error("Device rejected the request signature (HTTP {status})")]
    AuthRejected { status: u16 },

    #[error("Device did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Command {command_id} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        command_id: EntityId,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    // ── Rule errors ──────────────────────────────────────────────────
    #[error("Action {action} of rule {rule_id} failed: {message}")]
    ActionExecution {
        rule_id: EntityId,
        action: String,
        message: String,
    },

    // ── Transport errors (wrapped, not exposed raw) ──────────────────
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Hub is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity_type: &'static str, id: &EntityId) -> Self {
        Self::NotFound {
            entity_type,
            identifier: id.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<iotdeck_api::Error> for CoreError {
    fn from(err: iotdeck_api::Error) -> Self {
        match err {
            iotdeck_api::Error::AuthRejected { status } => CoreError::AuthRejected { status },
            iotdeck_api::Error::Unreachable { url, reason } => CoreError::DeviceUnreachable {
                device_id: url,
                reason,
            },
            iotdeck_api::Error::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            iotdeck_api::Error::Device { status, message } => CoreError::Transport {
                message,
                status: Some(status),
            },
            iotdeck_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else if e.is_connect() {
                    CoreError::DeviceUnreachable {
                        device_id: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Transport {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            iotdeck_api::Error::InvalidUrl(e) => CoreError::validation(format!("invalid URL: {e}")),
            iotdeck_api::Error::InvalidHeader { name, reason } => {
                CoreError::validation(format!("invalid header {name}: {reason}"))
            }
            iotdeck_api::Error::InvalidMethod(m) => {
                CoreError::validation(format!("unsupported HTTP method: {m}"))
            }
            iotdeck_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            iotdeck_api::Error::Serialization(e) => {
                CoreError::Internal(format!("serialization error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_dispatch_variants() {
        let auth: CoreError = iotdeck_api::Error::AuthRejected { status: 403 }.into();
        assert!(matches!(auth, CoreError::AuthRejected { status: 403 }));

        let timeout: CoreError = iotdeck_api::Error::Timeout { timeout_ms: 250 }.into();
        assert!(matches!(timeout, CoreError::Timeout { timeout_ms: 250 }));

        let header: CoreError = iotdeck_api::Error::InvalidHeader {
            name: "a b".into(),
            reason: "bad".into(),
        }
        .into();
        assert!(header.is_validation());
    }
}
