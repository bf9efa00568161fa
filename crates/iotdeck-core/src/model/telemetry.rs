// ── Telemetry domain types ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// A telemetry reading: number, string or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl TelemetryValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for TelemetryValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for TelemetryValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for TelemetryValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

/// One recorded sample. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub value: TelemetryValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl TelemetrySample {
    pub fn new(
        device_id: impl Into<EntityId>,
        key: impl Into<String>,
        value: impl Into<TelemetryValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            key: key.into(),
            value: value.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Result of one ingest call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Appended to its series; `evicted` older samples were dropped.
    Recorded { event_id: String, evicted: usize },
    /// Older than the series tail; parked in the dead-letter queue.
    DeadLettered { event_id: String },
}

impl IngestOutcome {
    pub fn event_id(&self) -> &str {
        match self {
            Self::Recorded { event_id, .. } | Self::DeadLettered { event_id } => event_id,
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn value_deserializes_untagged() {
        let n: TelemetryValue = serde_json::from_str("36.5").unwrap();
        let b: TelemetryValue = serde_json::from_str("true").unwrap();
        let s: TelemetryValue = serde_json::from_str("\"open\"").unwrap();
        assert_eq!(n, TelemetryValue::Number(36.5));
        assert_eq!(b, TelemetryValue::Bool(true));
        assert_eq!(s, TelemetryValue::Text("open".into()));
    }

    #[test]
    fn sample_omits_missing_unit() {
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let sample = TelemetrySample::new("dev-001", "temperature", 21.0, ts);
        let json = serde_json::to_value(&sample).unwrap();
        assert!(json.get("unit").is_none());
        assert_eq!(json["value"], serde_json::json!(21.0));
    }
}
