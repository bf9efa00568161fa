// ── Telemetry ingest ──
//
// Accepts samples, appends them to bounded per-(device, key) series and
// keeps device liveness (`last_seen`, offline → online) current. Liveness
// follows the time a sample is received, never the device's own clock; the
// sample timestamp only orders the series. Writes to
// one series serialize on its map entry; distinct series proceed in
// parallel.

mod series;

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::TelemetryConfig;
use crate::error::CoreError;
use crate::model::{DeviceStatus, EntityId, IngestOutcome, TelemetrySample};
use crate::store::DataStore;

use self::series::Series;

/// (organization, device, key)
type SeriesKey = (EntityId, EntityId, String);

/// A sample refused because it was older than its series tail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub organization_id: EntityId,
    pub event_id: String,
    pub sample: TelemetrySample,
    /// Series tail at the time of refusal.
    pub tail: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Everything one ingest call changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub outcome: IngestOutcome,
    /// Set when the sample brought an offline device back online.
    pub status_change: Option<(DeviceStatus, DeviceStatus)>,
}

pub struct TelemetryIngest {
    store: Arc<DataStore>,
    config: TelemetryConfig,
    series: DashMap<SeriesKey, Series>,
    /// Bounded per organization.
    dead_letters: DashMap<EntityId, VecDeque<DeadLetter>>,
}

impl TelemetryIngest {
    pub(crate) fn new(store: Arc<DataStore>, config: TelemetryConfig) -> Self {
        Self {
            store,
            config,
            series: DashMap::new(),
            dead_letters: DashMap::new(),
        }
    }

    /// Record one sample for a device of `org`.
    ///
    /// Unknown or tombstoned devices and non-finite numbers are rejected
    /// before anything changes. Samples older than their series tail still
    /// count as a sign of life but go to the dead-letter queue instead of
    /// the series.
    pub fn ingest(
        &self,
        org: &EntityId,
        sample: TelemetrySample,
        event_id: Option<String>,
    ) -> Result<IngestReport, CoreError> {
        if sample.key.trim().is_empty() {
            return Err(CoreError::validation("telemetry key must not be empty"));
        }
        if sample.value.as_f64().is_some_and(|n| !n.is_finite()) {
            return Err(CoreError::validation(format!(
                "telemetry value for {} is not a finite number",
                sample.key
            )));
        }

        let org_record = self
            .store
            .organization(org)
            .ok_or_else(|| CoreError::not_found("organization", org))?;

        let received_at = Utc::now();
        let status_change = self.touch_device(org, &sample.device_id, received_at)?;
        let event_id = event_id.unwrap_or_else(|| EntityId::generate().to_string());

        let max_age = self.config.max_age.map_or_else(
            || chrono::Duration::days(i64::from(org_record.settings.retention_days)),
            |age| chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX),
        );

        let key = (org.clone(), sample.device_id.clone(), sample.key.clone());
        let pushed = {
            let mut series = self
                .series
                .entry(key)
                .or_insert_with(|| Series::new(self.config.capacity));
            series.push(sample, Some(max_age))
        };

        let outcome = match pushed {
            Ok(evicted) => {
                trace!(event_id = %event_id, evicted, "telemetry recorded");
                IngestOutcome::Recorded { event_id, evicted }
            }
            Err(late) => {
                warn!(
                    device_id = %late.sample.device_id,
                    key = %late.sample.key,
                    sample_ts = %late.sample.timestamp,
                    tail_ts = %late.tail,
                    "out-of-order telemetry sample dead-lettered"
                );
                self.push_dead_letter(DeadLetter {
                    organization_id: org.clone(),
                    event_id: event_id.clone(),
                    sample: late.sample,
                    tail: late.tail,
                    received_at,
                });
                IngestOutcome::DeadLettered { event_id }
            }
        };

        Ok(IngestReport {
            outcome,
            status_change,
        })
    }

    // ── Series reads ─────────────────────────────────────────────────

    /// Most recent sample of one series.
    pub fn latest(&self, org: &EntityId, device: &EntityId, key: &str) -> Option<TelemetrySample> {
        self.series
            .get(&(org.clone(), device.clone(), key.to_owned()))
            .and_then(|s| s.latest().cloned())
    }

    /// Full series, oldest first.
    pub fn series(&self, org: &EntityId, device: &EntityId, key: &str) -> Vec<TelemetrySample> {
        self.series
            .get(&(org.clone(), device.clone(), key.to_owned()))
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    pub fn series_len(&self, org: &EntityId, device: &EntityId, key: &str) -> usize {
        self.series
            .get(&(org.clone(), device.clone(), key.to_owned()))
            .map_or(0, |s| s.len())
    }

    /// Keys a device has reported, sorted.
    pub fn keys(&self, org: &EntityId, device: &EntityId) -> Vec<String> {
        self.series
            .iter()
            .filter(|e| e.key().0 == *org && e.key().1 == *device)
            .map(|e| e.key().2.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Dead-lettered samples of `org`, oldest first.
    pub fn dead_letters(&self, org: &EntityId) -> Vec<DeadLetter> {
        self.dead_letters
            .get(org)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn touch_device(
        &self,
        org: &EntityId,
        device_id: &EntityId,
        at: DateTime<Utc>,
    ) -> Result<Option<(DeviceStatus, DeviceStatus)>, CoreError> {
        if self.store.live_device(org, device_id).is_none() {
            return Err(CoreError::validation(format!(
                "telemetry for unknown device {device_id}"
            )));
        }

        let mut change = None;
        let updated = self.store.devices.update(org, device_id, |device| {
            if device.is_deleted() {
                return Err(CoreError::validation(format!(
                    "telemetry for deleted device {device_id}"
                )));
            }
            let mut next = device.clone();
            change = next.mark_seen(at).map(|prev| (prev, next.status));
            Ok(next)
        });

        match updated {
            Some(Ok(_)) => {
                if let Some((from, to)) = change {
                    debug!(device_id = %device_id, %from, %to, "device came online");
                }
                Ok(change)
            }
            Some(Err(e)) => Err(e),
            None => Err(CoreError::validation(format!(
                "telemetry for unknown device {device_id}"
            ))),
        }
    }

    fn push_dead_letter(&self, letter: DeadLetter) {
        let mut queue = self
            .dead_letters
            .entry(letter.organization_id.clone())
            .or_default();
        queue.push_back(letter);
        while queue.len() > self.config.dead_letter_capacity {
            queue.pop_front();
        }
    }
}
