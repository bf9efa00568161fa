// ── Rule events ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use super::condition::lookup_path;
use crate::model::{
    DeviceStatus, DeviceType, EntityId, TelemetrySample, TriggerConfig, TriggerType,
};

/// A device status transition, as seen by rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub device_id: EntityId,
    pub device_type: DeviceType,
    pub previous_status: DeviceStatus,
    pub status: DeviceStatus,
    pub metadata: serde_json::Map<String, Value>,
}

/// Anything a rule can react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleEvent {
    Telemetry {
        event_id: String,
        sample: TelemetrySample,
    },
    DeviceStatus {
        event_id: String,
        change: StatusChange,
    },
    Webhook {
        event_id: String,
        name: String,
        device_id: Option<EntityId>,
        payload: Value,
    },
    Schedule {
        event_id: String,
        name: String,
        at: DateTime<Utc>,
    },
}

impl RuleEvent {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Telemetry { .. } => TriggerType::Telemetry,
            Self::DeviceStatus { .. } => TriggerType::DeviceStatus,
            Self::Webhook { .. } => TriggerType::Webhook,
            Self::Schedule { .. } => TriggerType::Schedule,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Self::Telemetry { event_id, .. }
            | Self::DeviceStatus { event_id, .. }
            | Self::Webhook { event_id, .. }
            | Self::Schedule { event_id, .. } => event_id,
        }
    }

    pub fn device_id(&self) -> Option<&EntityId> {
        match self {
            Self::Telemetry { sample, .. } => Some(&sample.device_id),
            Self::DeviceStatus { change, .. } => Some(&change.device_id),
            Self::Webhook { device_id, .. } => device_id.as_ref(),
            Self::Schedule { .. } => None,
        }
    }

    /// Whether the trigger's narrowing admits this event.
    pub fn matches_trigger(&self, config: &TriggerConfig) -> bool {
        if let Some(wanted) = &config.device_id {
            if self.device_id() != Some(wanted) {
                return false;
            }
        }
        match self {
            Self::Telemetry { sample, .. } => {
                config.key.as_ref().is_none_or(|k| *k == sample.key)
            }
            Self::Webhook { name, .. } | Self::Schedule { name, .. } => {
                config.name.as_ref().is_none_or(|n| n == name)
            }
            Self::DeviceStatus { .. } => true,
        }
    }

    /// Resolve a condition field against this event. `None` means the field
    /// does not exist, which makes any condition on it false.
    pub fn lookup(&self, field: &str) -> Option<Value> {
        match self {
            Self::Telemetry { sample, .. } => match field {
                "value" => Some(sample.value.to_json()),
                "key" => Some(Value::String(sample.key.clone())),
                "unit" => sample.unit.clone().map(Value::String),
                "device_id" => Some(Value::String(sample.device_id.to_string())),
                "timestamp" => Some(Value::String(sample.timestamp.to_rfc3339())),
                f if f == sample.key => Some(sample.value.to_json()),
                _ => None,
            },
            Self::DeviceStatus { change, .. } => match field {
                "status" => Some(Value::String(change.status.to_string())),
                "previous_status" => Some(Value::String(change.previous_status.to_string())),
                "device_id" => Some(Value::String(change.device_id.to_string())),
                "device_type" => Some(Value::String(change.device_type.to_string())),
                f => f
                    .strip_prefix("metadata.")
                    .and_then(|path| {
                        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
                        let root = change.metadata.get(head)?;
                        if rest.is_empty() {
                            Some(root)
                        } else {
                            lookup_path(root, rest)
                        }
                    })
                    .cloned(),
            },
            Self::Webhook {
                payload, device_id, ..
            } => match field {
                "device_id" if payload.get("device_id").is_none() => {
                    device_id.as_ref().map(|d| Value::String(d.to_string()))
                }
                f => lookup_path(payload, f).cloned(),
            },
            Self::Schedule { name, at, .. } => match field {
                "name" => Some(Value::String(name.clone())),
                "at" => Some(Value::String(at.to_rfc3339())),
                _ => None,
            },
        }
    }

    /// Placeholder values for alert messages.
    pub(crate) fn placeholders(&self) -> [(&'static str, String); 3] {
        let device = self.device_id().map(ToString::to_string).unwrap_or_default();
        let (key, value) = match self {
            Self::Telemetry { sample, .. } => (sample.key.clone(), sample.value.to_string()),
            Self::DeviceStatus { change, .. } => ("status".to_owned(), change.status.to_string()),
            Self::Webhook { name, .. } | Self::Schedule { name, .. } => (name.clone(), String::new()),
        };
        [("{device_id}", device), ("{key}", key), ("{value}", value)]
    }

    /// JSON body for webhook actions.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "event_id": self.event_id() }))
    }
}
