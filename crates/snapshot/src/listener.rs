//! Listener plumbing for snapshot advancement.

use lattice_core::SnapshotInfo;

/// Identifier returned by persistent listener registration, used to
/// deregister.
pub type ListenerId = u64;

/// One-shot callback released the first time the query snapshot reaches or
/// passes its registration target.
pub type SnapshotCallback = Box<dyn FnOnce(SnapshotInfo) + Send>;

/// Persistent subscription to every query-snapshot advancement.
///
/// Callbacks run inline on the thread that detected the advancement and are
/// replayed once with the current value at registration time, so a
/// subscriber never misses the initial state. A panicking listener is caught
/// and logged; it cannot block other subscribers.
pub trait SnapshotListener: Send + Sync {
    /// Called with each newly published query snapshot.
    fn on_snapshot_advanced(&self, info: SnapshotInfo);
}
