// ── Filter predicates for scoped listings ──
//
// Applied within one organization; scoping itself is the store's job.

use crate::model::{Alert, Device, DeviceStatus, DeviceType, EntityId, Severity};

/// Filter predicate for device listings.
pub enum DeviceFilter {
    ByType(DeviceType),
    ByStatus(DeviceStatus),
    /// Case-insensitive substring of the name or id.
    Search(String),
    /// Not tombstoned.
    Live,
    Custom(Box<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::ByType(dt) => device.device_type == *dt,
            Self::ByStatus(ds) => device.status == *ds,
            Self::Search(needle) => {
                let needle = needle.to_lowercase();
                device.name.to_lowercase().contains(&needle)
                    || device.id.to_string().to_lowercase().contains(&needle)
            }
            Self::Live => !device.is_deleted(),
            Self::Custom(f) => f(device),
        }
    }
}

/// Filter predicate for alert listings.
pub enum AlertFilter {
    Active,
    Unacknowledged,
    MinSeverity(Severity),
    ByDevice(EntityId),
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        match self {
            Self::Active => alert.is_active(),
            Self::Unacknowledged => alert.is_active() && !alert.acknowledged,
            Self::MinSeverity(min) => alert.severity >= *min,
            Self::ByDevice(dev) => alert.device_id.as_ref() == Some(dev),
        }
    }
}
