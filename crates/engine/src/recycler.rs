//! Log segment recycling
//!
//! Deletes durable log entries that every shard has applied and persisted
//! past, keeping a configured reserve of entries in front of the floor so a
//! lagging reader opened just before the round still finds its offset.

use lattice_core::contract::LogService;
use lattice_core::error::Result;
use lattice_core::QueueId;
use lattice_snapshot::{PeriodicTask, SnapshotManager};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Periodically deletes log entries behind the globally agreed durable
/// offset floor. Config-gated; constructed only when recycling is enabled.
pub struct LogRecycler {
    snapshots: Arc<SnapshotManager>,
    log: Arc<dyn LogService>,
    offset_reserve: u64,
    interval: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl LogRecycler {
    /// Create a stopped recycler.
    pub fn new(
        snapshots: Arc<SnapshotManager>,
        log: Arc<dyn LogService>,
        offset_reserve: u64,
        interval: Duration,
    ) -> Self {
        LogRecycler {
            snapshots,
            log,
            offset_reserve,
            interval,
            task: Mutex::new(None),
        }
    }

    /// One recycle round. Per-queue I/O failure is logged and the loop
    /// continues with the remaining queues.
    pub fn recycle_once(&self) {
        for (queue, offset) in self.snapshots.get_queue_offsets().iter().enumerate() {
            let target = offset.saturating_sub(self.offset_reserve);
            if target == 0 {
                continue;
            }
            match self.log.delete_before(queue as QueueId, target) {
                Ok(()) => debug!(queue, target, "log entries recycled"),
                Err(e) => warn!(queue, target, error = %e, "log recycle failed"),
            }
        }
    }

    /// Start the periodic recycle loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let recycler = Arc::clone(self);
        let task = PeriodicTask::spawn("log-recycle", self.interval, move || {
            recycler.recycle_once();
        })?;
        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Stop the periodic recycle loop.
    pub fn stop(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::error::Error;
    use lattice_core::{CoordinatorConfig, DdlRequestBatch};
    use lattice_durability::MemoryMetaStore;

    #[derive(Default)]
    struct RecordingLog {
        deleted: Mutex<Vec<(QueueId, u64)>>,
    }

    impl LogService for RecordingLog {
        fn check_readable(&self, _queue: QueueId, _offset: u64) -> Result<()> {
            Ok(())
        }
        fn append_ddl(&self, _snapshot_id: u64, _batch: &DdlRequestBatch) -> Result<()> {
            Err(Error::Rpc("not implemented".to_string()))
        }
        fn delete_before(&self, queue: QueueId, offset: u64) -> Result<()> {
            self.deleted.lock().push((queue, offset));
            Ok(())
        }
    }

    fn snapshot_manager_with_offsets(offsets: [(u64, u64); 2]) -> Arc<SnapshotManager> {
        let config = CoordinatorConfig::with_shard_count(2);
        let manager = Arc::new(
            SnapshotManager::bootstrap(Arc::new(MemoryMetaStore::new()), &config, Vec::new())
                .unwrap(),
        );
        manager
            .commit_snapshot_id(0, 1, 0, vec![offsets[0].0, offsets[0].1])
            .unwrap();
        manager
            .commit_snapshot_id(1, 1, 0, vec![offsets[1].0, offsets[1].1])
            .unwrap();
        manager.persist_queue_offsets().unwrap();
        manager
    }

    #[test]
    fn deletes_behind_floor_minus_reserve() {
        let manager = snapshot_manager_with_offsets([(100, 80), (90, 120)]);
        let log = Arc::new(RecordingLog::default());
        let recycler = LogRecycler::new(manager, Arc::clone(&log) as _, 30, Duration::from_secs(60));
        recycler.recycle_once();
        // Floors are (90, 80); reserve 30 leaves (60, 50).
        assert_eq!(*log.deleted.lock(), vec![(0, 60), (1, 50)]);
    }

    #[test]
    fn reserve_never_underflows() {
        let manager = snapshot_manager_with_offsets([(10, 100), (10, 100)]);
        let log = Arc::new(RecordingLog::default());
        let recycler = LogRecycler::new(manager, Arc::clone(&log) as _, 50, Duration::from_secs(60));
        recycler.recycle_once();
        // Queue 0 floor (10) is inside the reserve: skipped entirely.
        assert_eq!(*log.deleted.lock(), vec![(1, 50)]);
    }
}
