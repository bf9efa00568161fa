// ── Hub events ──
//
// Broadcast notifications for consumers that want deltas rather than
// full snapshots. Lagging receivers lose events; snapshots stay
// authoritative.

use serde::Serialize;

use crate::model::{CommandStatus, DeviceStatus, EntityId, Severity};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    DeviceStatusChanged {
        organization_id: EntityId,
        device_id: EntityId,
        from: DeviceStatus,
        to: DeviceStatus,
    },
    TelemetryDeadLettered {
        organization_id: EntityId,
        device_id: EntityId,
        key: String,
        event_id: String,
    },
    CommandFinished {
        organization_id: EntityId,
        command_id: EntityId,
        status: CommandStatus,
    },
    AlertRaised {
        organization_id: EntityId,
        alert_id: EntityId,
        rule_id: EntityId,
        severity: Severity,
    },
    ActionFailed {
        organization_id: EntityId,
        rule_id: EntityId,
        action: String,
        message: String,
    },
}
