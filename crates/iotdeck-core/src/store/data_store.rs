// ── Central reactive data store ──
//
// Thread-safe, lock-free storage for all iotdeck domain entities.
// Mutations are broadcast to subscribers via per-organization `watch`
// channels. Every public read takes an organization: a foreign entity
// looks exactly like a missing one.

use std::sync::Arc;

use super::collection::EntityCollection;
use crate::model::{
    Alert, Command, CommandStats, Device, DeviceStatus, DeviceSummary, EntityId, Organization,
    Rule, TriggerType,
};
use crate::stream::{AlertFilter, DeviceFilter, EntityStream};

/// Central reactive store for organizations, devices, commands, rules
/// and alerts.
///
/// Thread-safe and lock-free: all reads are wait-free, writes use
/// fine-grained per-shard locks within `DashMap`. Only the hub's
/// components write; everyone else reads `Arc` snapshots.
pub struct DataStore {
    pub(crate) organizations: EntityCollection<Organization>,
    pub(crate) devices: EntityCollection<Device>,
    pub(crate) commands: EntityCollection<Command>,
    pub(crate) rules: EntityCollection<Rule>,
    pub(crate) alerts: EntityCollection<Alert>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            organizations: EntityCollection::new(),
            devices: EntityCollection::new(),
            commands: EntityCollection::new(),
            rules: EntityCollection::new(),
            alerts: EntityCollection::new(),
        }
    }

    // ── Hub-internal sweeps ──────────────────────────────────────────

    /// Devices of every organization.
    pub(crate) fn all_devices(&self) -> Vec<Arc<Device>> {
        self.devices.all()
    }

    /// Commands of every organization.
    pub(crate) fn all_commands(&self) -> Vec<Arc<Command>> {
        self.commands.all()
    }

    // ── Tenant-scoped lookups ────────────────────────────────────────

    pub fn organization(&self, id: &EntityId) -> Option<Arc<Organization>> {
        self.organizations.get(id, id)
    }

    /// A device of `org`, tombstoned or not.
    pub fn device(&self, org: &EntityId, id: &EntityId) -> Option<Arc<Device>> {
        self.devices.get(org, id)
    }

    /// A device of `org` that still accepts telemetry and commands.
    pub fn live_device(&self, org: &EntityId, id: &EntityId) -> Option<Arc<Device>> {
        self.device(org, id).filter(|d| !d.is_deleted())
    }

    /// Devices of `org`, tombstones hidden.
    pub fn devices(&self, org: &EntityId) -> Vec<Arc<Device>> {
        self.devices
            .scoped(org)
            .into_iter()
            .filter(|d| !d.is_deleted())
            .collect()
    }

    /// Live devices of `org` matching every filter.
    pub fn devices_matching(&self, org: &EntityId, filters: &[DeviceFilter]) -> Vec<Arc<Device>> {
        self.devices(org)
            .into_iter()
            .filter(|d| filters.iter().all(|f| f.matches(d)))
            .collect()
    }

    pub fn device_summary(&self, org: &EntityId) -> DeviceSummary {
        self.devices(org)
            .iter()
            .fold(DeviceSummary::default(), |mut acc, d| {
                acc.total += 1;
                match d.status {
                    DeviceStatus::Online => acc.online += 1,
                    DeviceStatus::Offline => acc.offline += 1,
                    DeviceStatus::Warning | DeviceStatus::Error => acc.degraded += 1,
                }
                acc
            })
    }

    pub fn command(&self, org: &EntityId, id: &EntityId) -> Option<Arc<Command>> {
        self.commands.get(org, id)
    }

    pub fn commands(&self, org: &EntityId) -> Vec<Arc<Command>> {
        self.commands.scoped(org)
    }

    pub fn commands_for_device(&self, org: &EntityId, device: &EntityId) -> Vec<Arc<Command>> {
        self.commands
            .scoped(org)
            .into_iter()
            .filter(|c| c.device_id == *device)
            .collect()
    }

    pub fn command_stats(&self, org: &EntityId) -> CommandStats {
        let commands = self.commands(org);
        CommandStats::from_commands(commands.iter().map(AsRef::as_ref))
    }

    pub fn rule(&self, org: &EntityId, id: &EntityId) -> Option<Arc<Rule>> {
        self.rules.get(org, id)
    }

    pub fn rules(&self, org: &EntityId) -> Vec<Arc<Rule>> {
        self.rules.scoped(org)
    }

    /// Enabled rules of `org` listening to `trigger`.
    pub fn rules_for(&self, org: &EntityId, trigger: TriggerType) -> Vec<Arc<Rule>> {
        self.rules
            .scoped(org)
            .into_iter()
            .filter(|r| r.enabled && r.trigger.trigger_type == trigger)
            .collect()
    }

    pub fn alert(&self, org: &EntityId, id: &EntityId) -> Option<Arc<Alert>> {
        self.alerts.get(org, id)
    }

    /// All alerts of `org`, dismissed ones included.
    pub fn alerts(&self, org: &EntityId) -> Vec<Arc<Alert>> {
        self.alerts.scoped(org)
    }

    /// Alerts of `org` matching every filter.
    pub fn alerts_matching(&self, org: &EntityId, filters: &[AlertFilter]) -> Vec<Arc<Alert>> {
        self.alerts
            .scoped(org)
            .into_iter()
            .filter(|a| filters.iter().all(|f| f.matches(a)))
            .collect()
    }

    /// Alerts of `org` that have not been dismissed.
    pub fn active_alerts(&self, org: &EntityId) -> Vec<Arc<Alert>> {
        self.alerts_matching(org, &[AlertFilter::Active])
    }

    // ── Subscription methods ─────────────────────────────────────────

    pub fn subscribe_devices(&self, org: &EntityId) -> EntityStream<Device> {
        EntityStream::new(org.clone(), self.devices.subscribe(org))
    }

    pub fn subscribe_commands(&self, org: &EntityId) -> EntityStream<Command> {
        EntityStream::new(org.clone(), self.commands.subscribe(org))
    }

    pub fn subscribe_rules(&self, org: &EntityId) -> EntityStream<Rule> {
        EntityStream::new(org.clone(), self.rules.subscribe(org))
    }

    pub fn subscribe_alerts(&self, org: &EntityId) -> EntityStream<Alert> {
        EntityStream::new(org.clone(), self.alerts.subscribe(org))
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
