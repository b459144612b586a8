//! Identifier types and the snapshot ordering pair
//!
//! Snapshot ids are plain `u64` counters. A snapshot id identifies a globally
//! ordered point in the write history: reads at a snapshot see all writes
//! assigned an id less than or equal to it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a storage shard (partition of the graph).
///
/// Shards are numbered densely from zero up to the configured shard count.
pub type ShardId = u32;

/// Identifier of a query frontend known to the coordinator.
pub type FrontendId = u32;

/// Identifier of a durable log queue. There is one queue per shard, so valid
/// queue ids share the shard id range.
pub type QueueId = u32;

/// The pair of counters that orders everything in the system.
///
/// `snapshot_id` is the logical write-ordering counter. `ddl_snapshot_id` is
/// the snapshot at which the currently-visible schema became effective.
///
/// Ordering is by `snapshot_id` alone: two infos with the same `snapshot_id`
/// compare equal for ordering purposes even if their ddl components differ.
/// The query-visible `ddl_snapshot_id` never decreases outside the documented
/// shard-failover tolerance window, which the snapshot manager clamps away
/// before publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Logical write-ordering counter.
    pub snapshot_id: u64,
    /// Snapshot at which the visible schema became effective.
    pub ddl_snapshot_id: u64,
}

impl SnapshotInfo {
    /// Create a new snapshot pair.
    pub fn new(snapshot_id: u64, ddl_snapshot_id: u64) -> Self {
        SnapshotInfo {
            snapshot_id,
            ddl_snapshot_id,
        }
    }
}

impl PartialOrd for SnapshotInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SnapshotInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.snapshot_id.cmp(&other.snapshot_id)
    }
}

impl fmt::Display for SnapshotInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(snapshot={}, ddl={})", self.snapshot_id, self.ddl_snapshot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ignores_ddl_component() {
        let a = SnapshotInfo::new(5, 2);
        let b = SnapshotInfo::new(5, 9);
        let c = SnapshotInfo::new(3, 9);

        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(c < a);
        assert_eq!(std::cmp::min(a, c), c);
    }

    #[test]
    fn roundtrips_through_bincode() {
        let info = SnapshotInfo::new(42, 7);
        let bytes = bincode::serialize(&info).unwrap();
        let back: SnapshotInfo = bincode::deserialize(&bytes).unwrap();
        assert_eq!(info, back);
    }
}
