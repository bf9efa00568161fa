// ── Generic reactive entity collection ──
//
// Lock-free concurrent storage with O(1) lookups and push-based
// change notification via `watch` channels.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use crate::model::{Alert, Command, Device, EntityId, Organization, Rule};

/// An entity owned by exactly one organization.
pub(crate) trait TenantEntity: Clone + Send + Sync + 'static {
    fn id(&self) -> &EntityId;
    fn organization_id(&self) -> &EntityId;
    /// Snapshot ordering. Entities without a creation time sort first.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// `(organization, id)`. Ids are unique within one organization only.
type TenantKey = (EntityId, EntityId);

/// Per-organization snapshot vended to subscribers.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// A lock-free, reactive collection for a single entity type.
///
/// Entities are keyed by `(organization, id)`, so two organizations can
/// use the same id and neither can observe the other. Every mutation
/// bumps a version counter and republishes the snapshot of the one
/// organization it touched.
pub(crate) struct EntityCollection<T: TenantEntity> {
    /// Primary storage: (org, id) -> entity.
    by_key: DashMap<TenantKey, Arc<T>>,

    /// Secondary index: organization -> member ids.
    by_org: DashMap<EntityId, HashSet<EntityId>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// One snapshot channel per organization, created on first use.
    snapshots: DashMap<EntityId, watch::Sender<Snapshot<T>>>,
}

impl<T: TenantEntity> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);

        Self {
            by_key: DashMap::new(),
            by_org: DashMap::new(),
            version,
            snapshots: DashMap::new(),
        }
    }

    /// Insert an entity unless its organization already holds the id.
    /// Returns `true` if inserted.
    pub(crate) fn insert(&self, entity: T) -> bool {
        let id = entity.id().clone();
        let org = entity.organization_id().clone();
        {
            let Entry::Vacant(slot) = self.by_key.entry((org.clone(), id.clone())) else {
                return false;
            };
            slot.insert(Arc::new(entity));
        }
        self.by_org.entry(org.clone()).or_default().insert(id);

        self.publish(&org);
        true
    }

    /// Compare-and-set update of one entity.
    ///
    /// `f` runs while the entry is locked, so concurrent updates of the
    /// same entity serialize and each sees the previous one's result. An
    /// `Err` from `f` leaves the entity untouched. Returns `None` if absent.
    pub(crate) fn update<E>(
        &self,
        org: &EntityId,
        id: &EntityId,
        f: impl FnOnce(&T) -> Result<T, E>,
    ) -> Option<Result<Arc<T>, E>> {
        let result = {
            let mut entry = self.by_key.get_mut(&(org.clone(), id.clone()))?;
            match f(entry.value()) {
                Ok(next) => {
                    let next = Arc::new(next);
                    *entry.value_mut() = Arc::clone(&next);
                    Ok(next)
                }
                Err(e) => Err(e),
            }
        };
        if result.is_ok() {
            self.publish(org);
        }
        Some(result)
    }

    /// Remove an entity. Returns it if it existed.
    pub(crate) fn remove(&self, org: &EntityId, id: &EntityId) -> Option<Arc<T>> {
        let (_, removed) = self.by_key.remove(&(org.clone(), id.clone()))?;
        if let Some(mut members) = self.by_org.get_mut(org) {
            members.remove(id);
        }
        self.publish(org);
        Some(removed)
    }

    /// Look up an entity of `org`. A foreign entity is indistinguishable
    /// from a missing one.
    pub(crate) fn get(&self, org: &EntityId, id: &EntityId) -> Option<Arc<T>> {
        self.by_key
            .get(&(org.clone(), id.clone()))
            .map(|r| Arc::clone(r.value()))
    }

    /// All entities of one organization, in snapshot order.
    pub(crate) fn scoped(&self, org: &EntityId) -> Vec<Arc<T>> {
        let Some(members) = self.by_org.get(org).map(|m| m.clone()) else {
            return Vec::new();
        };
        let mut items: Vec<Arc<T>> = members.iter().filter_map(|id| self.get(org, id)).collect();
        sort_entities(&mut items);
        items
    }

    /// Every entity of every organization. For hub-internal sweeps only.
    pub(crate) fn all(&self) -> Vec<Arc<T>> {
        self.by_key.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Subscribe to one organization's snapshot.
    pub(crate) fn subscribe(&self, org: &EntityId) -> watch::Receiver<Snapshot<T>> {
        if let Some(tx) = self.snapshots.get(org) {
            return tx.subscribe();
        }
        // Built under the entry lock so a concurrent `publish` either sees
        // the new channel or finished its mutation before `scoped` ran.
        self.snapshots
            .entry(org.clone())
            .or_insert_with(|| watch::channel(Arc::new(self.scoped(org))).0)
            .subscribe()
    }

    #[cfg(test)]
    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Rebuild `org`'s snapshot, broadcast it and bump the version.
    ///
    /// Must not be called while holding a `by_key` guard.
    fn publish(&self, org: &EntityId) {
        if let Some(tx) = self.snapshots.get(org) {
            let items = Arc::new(self.scoped(org));
            // `send_modify` updates unconditionally, even with zero receivers.
            tx.send_modify(|snap| *snap = items);
        }
        self.version.send_modify(|v| *v += 1);
    }
}

fn sort_entities<T: TenantEntity>(items: &mut [Arc<T>]) {
    items.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

// ── TenantEntity impls ──────────────────────────────────────────────

impl TenantEntity for Organization {
    fn id(&self) -> &EntityId {
        &self.id
    }
    fn organization_id(&self) -> &EntityId {
        &self.id
    }
}

impl TenantEntity for Device {
    fn id(&self) -> &EntityId {
        &self.id
    }
    fn organization_id(&self) -> &EntityId {
        &self.organization_id
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl TenantEntity for Command {
    fn id(&self) -> &EntityId {
        &self.id
    }
    fn organization_id(&self) -> &EntityId {
        &self.organization_id
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl TenantEntity for Rule {
    fn id(&self) -> &EntityId {
        &self.id
    }
    fn organization_id(&self) -> &EntityId {
        &self.organization_id
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

impl TenantEntity for Alert {
    fn id(&self) -> &EntityId {
        &self.id
    }
    fn organization_id(&self) -> &EntityId {
        &self.organization_id
    }
    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}
