// ── Reactive data store ──
//
// Lock-free entity storage with push-based change notification, keyed and
// published per organization.

mod collection;
mod data_store;

pub use collection::Snapshot;
pub use data_store::DataStore;
