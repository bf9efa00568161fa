// ── Alert lifecycle ──
//
// Alerts are raised only by firing rules. After creation the only
// mutations are acknowledge and dismiss, both idempotent. Creation is
// deduplicated per (rule, device, triggering event): the key index is
// consulted and written under one map-entry lock.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::event::HubEvent;
use crate::model::{Alert, AlertKey, EntityId, Severity};
use crate::store::DataStore;

/// What a firing `alert` action asks for.
#[derive(Debug, Clone)]
pub(crate) struct RaiseAlert {
    pub key: AlertKey,
    pub severity: Severity,
    pub message: String,
}

pub struct AlertLifecycle {
    store: Arc<DataStore>,
    events: broadcast::Sender<HubEvent>,
    /// Dedup index, per organization.
    by_key: DashMap<(EntityId, AlertKey), EntityId>,
}

impl AlertLifecycle {
    pub(crate) fn new(store: Arc<DataStore>, events: broadcast::Sender<HubEvent>) -> Self {
        Self {
            store,
            events,
            by_key: DashMap::new(),
        }
    }

    /// Create the alert for `request.key`, or return the one already
    /// created for it. The flag is `true` when a new alert was created.
    pub(crate) fn raise(&self, org: &EntityId, request: RaiseAlert) -> Result<(Arc<Alert>, bool), CoreError> {
        match self.by_key.entry((org.clone(), request.key.clone())) {
            Entry::Occupied(existing) => {
                let id = existing.get().clone();
                drop(existing);
                debug!(key = %request.key, alert_id = %id, "duplicate alert suppressed");
                let alert = self
                    .store
                    .alert(org, &id)
                    .ok_or_else(|| CoreError::Internal(format!("alert {id} missing from store")))?;
                Ok((alert, false))
            }
            Entry::Vacant(slot) => {
                let alert = Alert {
                    id: EntityId::generate(),
                    organization_id: org.clone(),
                    device_id: request.key.device_id.clone(),
                    rule_id: request.key.rule_id.clone(),
                    severity: request.severity,
                    message: request.message,
                    acknowledged: false,
                    acknowledged_at: None,
                    dismissed: false,
                    dismissed_at: None,
                    key: request.key,
                    created_at: Utc::now(),
                };
                let id = alert.id.clone();
                self.store.alerts.insert(alert);
                slot.insert(id.clone());

                let alert = self
                    .store
                    .alerts
                    .get(org, &id)
                    .ok_or_else(|| CoreError::Internal(format!("alert {id} missing from store")))?;
                info!(
                    alert_id = %alert.id,
                    rule_id = %alert.rule_id,
                    severity = %alert.severity,
                    message = %alert.message,
                    "alert raised"
                );
                let _ = self.events.send(HubEvent::AlertRaised {
                    organization_id: org.clone(),
                    alert_id: alert.id.clone(),
                    rule_id: alert.rule_id.clone(),
                    severity: alert.severity,
                });
                Ok((alert, true))
            }
        }
    }

    /// Mark an alert acknowledged. Acknowledging twice changes nothing.
    pub fn acknowledge(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Alert>, CoreError> {
        self.mutate(org, id, |alert| alert.acknowledge(Utc::now()))
    }

    /// Hide an alert from the active list. Dismissing twice changes nothing;
    /// acknowledgment state is untouched.
    pub fn dismiss(&self, org: &EntityId, id: &EntityId) -> Result<Arc<Alert>, CoreError> {
        self.mutate(org, id, |alert| alert.dismiss(Utc::now()))
    }

    fn mutate(
        &self,
        org: &EntityId,
        id: &EntityId,
        apply: impl FnOnce(&mut Alert) -> bool,
    ) -> Result<Arc<Alert>, CoreError> {
        if self.store.alert(org, id).is_none() {
            return Err(CoreError::not_found("alert", id));
        }
        let updated = self.store.alerts.update(org, id, |alert| {
            let mut next = alert.clone();
            if apply(&mut next) { Ok(next) } else { Err(()) }
        });
        match updated {
            Some(Ok(alert)) => Ok(alert),
            // Already in the requested state.
            Some(Err(())) => self
                .store
                .alert(org, id)
                .ok_or_else(|| CoreError::not_found("alert", id)),
            None => Err(CoreError::not_found("alert", id)),
        }
    }
}
