// ── Device domain types ──

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use super::entity_id::EntityId;

/// Hardware class of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeviceType {
    Esp32,
    Esp8266,
    Arduino,
    RaspberryPi,
    Stm32,
    Custom,
}

/// Device operational status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
    Warning,
    Error,
}

impl DeviceStatus {
    /// Whether the device is known to be up (possibly degraded).
    pub fn is_reachable(self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// The canonical Device type.
///
/// `last_seen` only moves forward; `deleted_at` is a tombstone that keeps
/// the record alive for the commands that still reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: EntityId,
    pub organization_id: EntityId,
    pub name: String,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    /// Device auth token. Never serialized.
    #[serde(skip, default = "empty_token")]
    pub token: SecretString,
    /// Base address commands are delivered to.
    pub address: Option<Url>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

fn empty_token() -> SecretString {
    SecretString::from(String::new())
}

impl Device {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Record a sign of life at `at`.
    ///
    /// Advances `last_seen` monotonically and flips `offline → online`;
    /// `warning` / `error` are left alone. Returns the previous status if
    /// it changed.
    pub fn mark_seen(&mut self, at: DateTime<Utc>) -> Option<DeviceStatus> {
        if self.last_seen.is_none_or(|prev| at > prev) {
            self.last_seen = Some(at);
        }
        self.updated_at = Utc::now();
        if self.status == DeviceStatus::Offline {
            self.status = DeviceStatus::Online;
            return Some(DeviceStatus::Offline);
        }
        None
    }

    /// Whether the device has been silent for longer than `window` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.last_seen {
            Some(seen) => now - seen > window,
            None => now - self.created_at > window,
        }
    }
}

/// Registration request for a new device.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDevice {
    pub id: Option<EntityId>,
    pub name: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub token: Option<String>,
    pub address: Option<Url>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RegisterDevice {
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: None,
            name: name.into(),
            device_type,
            token: None,
            address: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_address(mut self, address: Url) -> Self {
        self.address = Some(address);
        self
    }
}

/// Per-status device counts for one organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    /// `warning` and `error` together.
    pub degraded: usize,
}
