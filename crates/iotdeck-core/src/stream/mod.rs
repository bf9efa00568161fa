// ── Tenant-scoped entity streams ──
//
// A subscription always belongs to one organization: the store hands out
// that organization's snapshots and nothing else.

mod filter;

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::EntityId;
use crate::store::Snapshot;

pub use filter::{AlertFilter, DeviceFilter};

/// Live view of one organization's entities of type `T`.
pub struct EntityStream<T: Clone + Send + Sync + 'static> {
    organization_id: EntityId,
    seen: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(organization_id: EntityId, receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let seen = receiver.borrow().clone();
        Self {
            organization_id,
            seen,
            receiver,
        }
    }

    pub fn organization_id(&self) -> &EntityId {
        &self.organization_id
    }

    /// Snapshot as of creation or the last [`changed`](Self::changed).
    pub fn seen(&self) -> &Snapshot<T> {
        &self.seen
    }

    /// Current snapshot, whether or not it has been observed.
    pub fn latest(&self) -> Snapshot<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        self.seen = self.receiver.borrow_and_update().clone();
        Some(Arc::clone(&self.seen))
    }

    /// Wait until some entity satisfies `pred`, checking the current
    /// snapshot first.
    pub async fn wait_for(&mut self, pred: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        let mut snapshot = self.receiver.borrow_and_update().clone();
        loop {
            if let Some(hit) = snapshot.iter().find(|e| pred(e)) {
                self.seen = Arc::clone(&snapshot);
                return Some(Arc::clone(hit));
            }
            snapshot = self.changed().await?;
        }
    }

    /// Convert into a `Stream` of snapshots, starting with the current one.
    pub fn into_stream(self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.receiver)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stream(initial: Vec<u32>) -> (watch::Sender<Snapshot<u32>>, EntityStream<u32>) {
        let (tx, rx) = watch::channel(Arc::new(initial.into_iter().map(Arc::new).collect()));
        (tx, EntityStream::new(EntityId::from("org-1"), rx))
    }

    fn publish(tx: &watch::Sender<Snapshot<u32>>, values: &[u32]) {
        tx.send_replace(Arc::new(values.iter().copied().map(Arc::new).collect()));
    }

    #[tokio::test]
    async fn wait_for_matches_current_snapshot() {
        let (_tx, mut stream) = stream(vec![1, 2]);
        assert_eq!(*stream.wait_for(|n| *n == 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn wait_for_follows_changes() {
        let (tx, mut stream) = stream(vec![1]);
        let waiter = tokio::spawn(async move { stream.wait_for(|n| *n > 5).await });
        publish(&tx, &[1, 3]);
        tokio::task::yield_now().await;
        publish(&tx, &[1, 3, 8]);
        assert_eq!(*waiter.await.unwrap().unwrap(), 8);
    }

    #[tokio::test]
    async fn wait_for_ends_when_store_drops() {
        let (tx, mut stream) = stream(vec![]);
        drop(tx);
        assert!(stream.wait_for(|_| true).await.is_none());
    }
}
