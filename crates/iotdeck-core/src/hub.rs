// ── Hub abstraction ──
//
// Owns the store and every component around it, exposes the action
// verbs the presentation layer needs, and runs the background tasks
// (command queue processor, liveness sweep).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use iotdeck_api::{DeviceClient, RequestSigner};

use crate::alerts::AlertLifecycle;
use crate::config::HubConfig;
use crate::dispatch::{CommandDispatcher, DeviceTransport, HttpTransport};
use crate::error::CoreError;
use crate::event::HubEvent;
use crate::model::{
    Alert, Command, CommandOrigin, CommandStats, Device, DeviceStatus, EntityId, NewCommand,
    NewRule, Organization, RegisterDevice, Rule, TelemetrySample,
};
use crate::rules::{EvaluationReport, RuleEvaluator, RuleEvent, StatusChange};
use crate::store::DataStore;
use crate::telemetry::{IngestReport, TelemetryIngest};

// ── HubState ─────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Idle,
    Running,
    Stopped,
}

/// Result of a status-affecting update (heartbeat, reported status).
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub device: Arc<Device>,
    /// `(from, to)` when the status changed.
    pub change: Option<(DeviceStatus, DeviceStatus)>,
    pub rules: EvaluationReport,
}

/// Result of ingesting one telemetry sample.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    pub ingest: IngestReport,
    /// Telemetry rules, then device-status rules if the sample brought
    /// the device back online.
    pub rules: EvaluationReport,
}

// ── Hub ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<HubInner>`. Build it, call
/// [`start()`](Self::start) to spawn background tasks, and
/// [`shutdown()`](Self::shutdown) to cancel every in-flight command and
/// stop them again.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: HubConfig,
    store: Arc<DataStore>,
    telemetry: TelemetryIngest,
    alerts: Arc<AlertLifecycle>,
    dispatcher: CommandDispatcher,
    evaluator: RuleEvaluator,
    event_tx: broadcast::Sender<HubEvent>,
    state: watch::Sender<HubState>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Create a hub that delivers commands over signed HTTP.
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        let signer = RequestSigner::new(config.signing_secret.clone());
        let client = DeviceClient::new(&config.transport, signer)?;
        let transport: Arc<dyn DeviceTransport> = Arc::new(HttpTransport::new(client));
        Ok(Self::with_transport(config, transport))
    }

    /// Create a hub on top of any transport. Does not start background
    /// tasks.
    pub fn with_transport(config: HubConfig, transport: Arc<dyn DeviceTransport>) -> Self {
        let store = Arc::new(DataStore::new());
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let (state, _) = watch::channel(HubState::Idle);
        let cancel = CancellationToken::new();

        let telemetry = TelemetryIngest::new(Arc::clone(&store), config.telemetry.clone());
        let alerts = Arc::new(AlertLifecycle::new(Arc::clone(&store), event_tx.clone()));
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&store),
            transport,
            config.commands.clone(),
            event_tx.clone(),
            cancel.child_token(),
        );
        let evaluator = RuleEvaluator::new(
            Arc::clone(&store),
            Arc::clone(&alerts),
            dispatcher.clone(),
            event_tx.clone(),
            config.commands.timeout,
        );

        Self {
            inner: Arc::new(HubInner {
                config,
                store,
                telemetry,
                alerts,
                dispatcher,
                evaluator,
                event_tx,
                state,
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Access the underlying DataStore.
    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn telemetry(&self) -> &TelemetryIngest {
        &self.inner.telemetry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.inner.dispatcher
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<HubState> {
        self.inner.state.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the command queue processor and, unless the sweep interval
    /// is zero, the liveness sweep.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(handle) = self.inner.dispatcher.start().await {
            handles.push(handle);
        }

        let interval = self.inner.config.liveness.sweep_interval;
        if interval > Duration::ZERO && *self.inner.state.borrow() == HubState::Idle {
            handles.push(tokio::spawn(liveness_task(
                self.clone(),
                interval,
                self.inner.cancel.child_token(),
            )));
        }

        self.inner.state.send_replace(HubState::Running);
        info!(
            sweep_interval_secs = interval.as_secs(),
            liveness_window_secs = self.inner.config.liveness.window.as_secs(),
            "hub started"
        );
        Ok(())
    }

    /// Stop background work. Every `pending`/`sent` command ends `failed`
    /// with reason `cancelled`.
    pub async fn shutdown(&self) {
        info!(inflight = self.inner.dispatcher.inflight(), "hub stopping");
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.dispatcher.shutdown().await;

        self.inner.state.send_replace(HubState::Stopped);
        debug!("hub stopped");
    }

    // ── Organizations & devices ──────────────────────────────────

    pub fn register_organization(&self, org: Organization) -> Result<Arc<Organization>, CoreError> {
        if org.name.trim().is_empty() {
            return Err(CoreError::validation("organization name must not be empty"));
        }
        let id = org.id.clone();
        if !self.inner.store.organizations.insert(org) {
            return Err(CoreError::Duplicate {
                entity_type: "organization",
                identifier: id.to_string(),
            });
        }
        info!(organization_id = %id, "organization registered");
        self.inner
            .store
            .organization(&id)
            .ok_or_else(|| CoreError::Internal(format!("organization {id} vanished after insert")))
    }

    /// Register a device. It starts `offline` until it first reports in.
    pub fn register_device(&self, org: &EntityId, request: RegisterDevice) -> Result<Arc<Device>, CoreError> {
        if request.name.trim().is_empty() {
            return Err(CoreError::validation("device name must not be empty"));
        }
        if self.inner.store.organization(org).is_none() {
            return Err(CoreError::not_found("organization", org));
        }

        let now = Utc::now();
        let id = request.id.unwrap_or_else(EntityId::generate);
        let token = request
            .token
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let device = Device {
            id: id.clone(),
            organization_id: org.clone(),
            name: request.name,
            device_type: request.device_type,
            status: DeviceStatus::Offline,
            last_seen: None,
            token: token.into(),
            address: request.address,
            metadata: request.metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        if !self.inner.store.devices.insert(device) {
            return Err(CoreError::Duplicate {
                entity_type: "device",
                identifier: id.to_string(),
            });
        }
        info!(organization_id = %org, device_id = %id, "device registered");
        self.inner
            .store
            .devices
            .get(org, &id)
            .ok_or_else(|| CoreError::Internal(format!("device {id} vanished after insert")))
    }

    /// Tombstone a device and cancel its unfinished commands. Returns how
    /// many commands were cancelled.
    pub fn delete_device(&self, org: &EntityId, id: &EntityId) -> Result<usize, CoreError> {
        if self.inner.store.live_device(org, id).is_none() {
            return Err(CoreError::not_found("device", id));
        }
        let tombstoned = self.inner.store.devices.update(org, id, |d| {
            if d.is_deleted() {
                return Err(());
            }
            let mut next = d.clone();
            let now = Utc::now();
            next.deleted_at = Some(now);
            next.updated_at = now;
            Ok(next)
        });
        if !matches!(tombstoned, Some(Ok(_))) {
            return Err(CoreError::not_found("device", id));
        }

        let cancelled = self
            .inner
            .dispatcher
            .cancel_where(|c| c.organization_id == *org && c.device_id == *id);
        info!(device_id = %id, cancelled, "device deleted");
        Ok(cancelled)
    }

    /// Record a heartbeat from a device.
    pub async fn heartbeat(&self, org: &EntityId, id: &EntityId) -> Result<StatusUpdate, CoreError> {
        self.live_device_or_validation(org, id)?;
        let mut previous = None;
        let updated = self.inner.store.devices.update(org, id, |d| {
            if d.is_deleted() {
                return Err(());
            }
            let mut next = d.clone();
            previous = next.mark_seen(Utc::now());
            Ok(next)
        });
        let device = match updated {
            Some(Ok(device)) => device,
            _ => return Err(CoreError::validation(format!("unknown device {id}"))),
        };
        let change = previous.map(|from| (from, device.status));
        let rules = match change {
            Some((from, to)) => self.status_changed(org, &device, from, to).await,
            None => EvaluationReport::default(),
        };
        Ok(StatusUpdate {
            device,
            change,
            rules,
        })
    }

    /// Apply a status reported by the device or an external monitor.
    pub async fn report_device_status(
        &self,
        org: &EntityId,
        id: &EntityId,
        status: DeviceStatus,
    ) -> Result<StatusUpdate, CoreError> {
        self.live_device_or_validation(org, id)?;
        let mut previous = None;
        let updated = self.inner.store.devices.update(org, id, |d| {
            if d.is_deleted() || d.status == status {
                return Err(());
            }
            previous = Some(d.status);
            let mut next = d.clone();
            next.status = status;
            next.updated_at = Utc::now();
            Ok(next)
        });

        match (updated, previous) {
            (Some(Ok(device)), Some(from)) => {
                let rules = self.status_changed(org, &device, from, status).await;
                Ok(StatusUpdate {
                    device,
                    change: Some((from, status)),
                    rules,
                })
            }
            _ => {
                let device = self.live_device_or_validation(org, id)?;
                Ok(StatusUpdate {
                    device,
                    change: None,
                    rules: EvaluationReport::default(),
                })
            }
        }
    }

    // ── Event ingestion ──────────────────────────────────────────

    /// Record a telemetry sample and evaluate the rules it triggers.
    ///
    /// Dead-lettered samples still count as a sign of life but trigger no
    /// telemetry rules.
    pub async fn ingest_telemetry(
        &self,
        org: &EntityId,
        sample: TelemetrySample,
        event_id: Option<String>,
    ) -> Result<TelemetryReport, CoreError> {
        let ingest = self.inner.telemetry.ingest(org, sample.clone(), event_id)?;

        let mut rules = EvaluationReport::default();
        if let Some((from, to)) = ingest.status_change {
            if let Some(device) = self.inner.store.device(org, &sample.device_id) {
                rules = self.status_changed(org, &device, from, to).await;
            }
        }

        if ingest.outcome.is_recorded() {
            let event = RuleEvent::Telemetry {
                event_id: ingest.outcome.event_id().to_owned(),
                sample,
            };
            let report = self.inner.evaluator.evaluate(org, &event).await;
            rules.absorb(report);
        } else {
            let _ = self.inner.event_tx.send(HubEvent::TelemetryDeadLettered {
                organization_id: org.clone(),
                device_id: sample.device_id,
                key: sample.key,
                event_id: ingest.outcome.event_id().to_owned(),
            });
        }

        Ok(TelemetryReport { ingest, rules })
    }

    /// Feed an inbound webhook payload to `webhook` rules.
    pub async fn push_webhook(
        &self,
        org: &EntityId,
        name: impl Into<String>,
        payload: serde_json::Value,
        device_id: Option<EntityId>,
        event_id: Option<String>,
    ) -> Result<EvaluationReport, CoreError> {
        self.require_organization(org)?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::validation("webhook name must not be empty"));
        }
        let event = RuleEvent::Webhook {
            event_id: event_id.unwrap_or_else(|| EntityId::generate().to_string()),
            name,
            device_id,
            payload,
        };
        Ok(self.inner.evaluator.evaluate(org, &event).await)
    }

    /// Fire `schedule` rules named `name`. The hub keeps no clock of its
    /// own; an external scheduler calls this.
    pub async fn tick_schedule(
        &self,
        org: &EntityId,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<EvaluationReport, CoreError> {
        self.require_organization(org)?;
        let name = name.into();
        let event = RuleEvent::Schedule {
            event_id: format!("{name}@{}", at.timestamp()),
            name,
            at,
        };
        Ok(self.inner.evaluator.evaluate(org, &event).await)
    }

    // ── Commands ─────────────────────────────────────────────────

    pub async fn send_command(&self, org: &EntityId, request: NewCommand) -> Result<Arc<Command>, CoreError> {
        self.inner.dispatcher.submit(org, request).await
    }

    pub async fn retry_command(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Command>, CoreError> {
        self.inner.dispatcher.retry(org, id).await
    }

    pub fn cancel_command(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Command>, CoreError> {
        self.inner.dispatcher.cancel(org, id)
    }

    pub async fn wait_for_command(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Command>, CoreError> {
        self.inner.dispatcher.wait_terminal(org, id).await
    }

    pub fn command_stats(&self, org: &EntityId) -> CommandStats {
        self.inner.store.command_stats(org)
    }

    // ── Rules ────────────────────────────────────────────────────

    pub fn add_rule(&self, org: &EntityId, request: NewRule) -> Result<Arc<Rule>, CoreError> {
        request.validate().map_err(CoreError::validation)?;
        self.require_organization(org)?;

        let now = Utc::now();
        let id = request.id.unwrap_or_else(EntityId::generate);
        let rule = Rule {
            id: id.clone(),
            organization_id: org.clone(),
            name: request.name,
            description: request.description,
            trigger: request.trigger,
            conditions: request.conditions,
            actions: request.actions,
            enabled: request.enabled,
            created_at: now,
            updated_at: now,
        };
        if !self.inner.store.rules.insert(rule) {
            return Err(CoreError::Duplicate {
                entity_type: "rule",
                identifier: id.to_string(),
            });
        }
        info!(organization_id = %org, rule_id = %id, "rule added");
        self.inner
            .store
            .rules
            .get(org, &id)
            .ok_or_else(|| CoreError::Internal(format!("rule {id} vanished after insert")))
    }

    /// Enable or disable a rule. Disabling cancels the unfinished commands
    /// the rule issued.
    pub fn set_rule_enabled(&self, org: &EntityId, id: &EntityId, enabled: bool) -> Result<Arc<Rule>, CoreError> {
        if self.inner.store.rule(org, id).is_none() {
            return Err(CoreError::not_found("rule", id));
        }
        let rule = match self.inner.store.rules.update(org, id, |r| {
            let mut next = r.clone();
            next.enabled = enabled;
            next.updated_at = Utc::now();
            Ok::<_, CoreError>(next)
        }) {
            Some(result) => result?,
            None => return Err(CoreError::not_found("rule", id)),
        };

        if !enabled {
            let cancelled = self.cancel_rule_commands(org, id);
            info!(rule_id = %id, cancelled, "rule disabled");
        }
        Ok(rule)
    }

    /// Remove a rule and cancel the unfinished commands it issued. Alerts it
    /// raised stay.
    pub fn remove_rule(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Rule>, CoreError> {
        if self.inner.store.rule(org, id).is_none() {
            return Err(CoreError::not_found("rule", id));
        }
        let rule = self
            .inner
            .store
            .rules
            .remove(org, id)
            .ok_or_else(|| CoreError::not_found("rule", id))?;
        let cancelled = self.cancel_rule_commands(org, id);
        info!(rule_id = %id, cancelled, "rule removed");
        Ok(rule)
    }

    // ── Alerts ───────────────────────────────────────────────────

    pub fn acknowledge_alert(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Alert>, CoreError> {
        self.inner.alerts.acknowledge(org, id)
    }

    pub fn dismiss_alert(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Alert>, CoreError> {
        self.inner.alerts.dismiss(org, id)
    }

    // ── Liveness ─────────────────────────────────────────────────

    /// Flip every live device silent for longer than the liveness window
    /// to `offline`. Returns the ids of the devices that changed.
    pub async fn sweep_liveness(&self, now: DateTime<Utc>) -> Vec<EntityId> {
        let window = chrono::Duration::from_std(self.inner.config.liveness.window)
            .unwrap_or(chrono::Duration::MAX);
        let stale: Vec<Arc<Device>> = self
            .inner
            .store
            .all_devices()
            .into_iter()
            .filter(|d| !d.is_deleted() && d.status != DeviceStatus::Offline && d.is_stale(now, window))
            .collect();

        let mut flipped = Vec::new();
        for candidate in stale {
            let mut previous = None;
            let org = &candidate.organization_id;
            let updated = self.inner.store.devices.update(org, &candidate.id, |d| {
                if d.is_deleted() || d.status == DeviceStatus::Offline || !d.is_stale(now, window) {
                    return Err(());
                }
                previous = Some(d.status);
                let mut next = d.clone();
                next.status = DeviceStatus::Offline;
                next.updated_at = Utc::now();
                Ok(next)
            });
            if let (Some(Ok(device)), Some(from)) = (updated, previous) {
                debug!(device_id = %device.id, last_seen = ?device.last_seen, "device went silent");
                self.status_changed(org, &device, from, DeviceStatus::Offline)
                    .await;
                flipped.push(device.id.clone());
            }
        }
        flipped
    }

    // ── Private helpers ──────────────────────────────────────────

    fn require_organization(&self, org: &EntityId) -> Result<Arc<Organization>, CoreError> {
        self.inner
            .store
            .organization(org)
            .ok_or_else(|| CoreError::not_found("organization", org))
    }

    fn live_device_or_validation(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Device>, CoreError> {
        self.require_organization(org)?;
        self.inner
            .store
            .live_device(org, id)
            .ok_or_else(|| CoreError::validation(format!("unknown device {id}")))
    }

    /// Announce a status change and run `device_status` rules.
    async fn status_changed(
        &self,
        org: &EntityId,
        device: &Device,
        from: DeviceStatus,
        to: DeviceStatus,
    ) -> EvaluationReport {
        info!(device_id = %device.id, %from, %to, "device status changed");
        let _ = self.inner.event_tx.send(HubEvent::DeviceStatusChanged {
            organization_id: org.clone(),
            device_id: device.id.clone(),
            from,
            to,
        });
        let event = RuleEvent::DeviceStatus {
            event_id: EntityId::generate().to_string(),
            change: StatusChange {
                device_id: device.id.clone(),
                device_type: device.device_type,
                previous_status: from,
                status: to,
                metadata: device.metadata.clone(),
            },
        };
        self.inner.evaluator.evaluate(org, &event).await
    }

    fn cancel_rule_commands(&self, org: &EntityId, rule_id: &EntityId) -> usize {
        self.inner.dispatcher.cancel_where(|c| {
            c.organization_id == *org
                && matches!(&c.origin, CommandOrigin::Rule { rule_id: r } if r == rule_id)
        })
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically flip silent devices to `offline`.
async fn liveness_task(hub: Hub, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let flipped = hub.sweep_liveness(Utc::now()).await;
                if !flipped.is_empty() {
                    warn!(count = flipped.len(), "devices marked offline by liveness sweep");
                }
            }
        }
    }
}
