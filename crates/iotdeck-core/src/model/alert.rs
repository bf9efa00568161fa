// ── Alert domain types ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::EntityId;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

/// Deduplication key: one alert per (rule, device, triggering event).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub rule_id: EntityId,
    pub device_id: Option<EntityId>,
    pub event_id: String,
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device_id {
            Some(device) => write!(f, "{}/{device}/{}", self.rule_id, self.event_id),
            None => write!(f, "{}/-/{}", self.rule_id, self.event_id),
        }
    }
}

/// The canonical Alert type.
///
/// Only acknowledgment and dismissal ever change an alert after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: EntityId,
    pub organization_id: EntityId,
    /// `None` for schedule / webhook events not tied to a device.
    pub device_id: Option<EntityId>,
    pub rule_id: EntityId,
    pub severity: Severity,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub dismissed: bool,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub key: AlertKey,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Not dismissed. Acknowledged alerts stay active until dismissed.
    pub fn is_active(&self) -> bool {
        !self.dismissed
    }

    /// Returns `false` if already acknowledged.
    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_at = Some(at);
        true
    }

    /// Returns `false` if already dismissed.
    pub fn dismiss(&mut self, at: DateTime<Utc>) -> bool {
        if self.dismissed {
            return false;
        }
        self.dismissed = true;
        self.dismissed_at = Some(at);
        true
    }
}
