//! Garbage-collection floor aggregation
//!
//! Frontends report the minimum query snapshot they may still be reading.
//! The manager keeps the latest report per frontend (last-write-wins, no
//! ordering check: an out-of-order report can move the observed floor
//! backward transiently, bounded by the next periodic recompute) and
//! periodically pushes `min(reports) - 1` to every shard as the
//! safe-to-collect point.

use dashmap::DashMap;
use lattice_core::contract::StoreClient;
use lattice_core::error::Result;
use lattice_core::FrontendId;
use lattice_snapshot::{fire_and_forget, PeriodicTask};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Aggregates per-frontend snapshot floors and broadcasts the global GC
/// floor to storage shards.
pub struct GarbageCollectManager {
    stores: Vec<Arc<dyn StoreClient>>,
    reports: DashMap<FrontendId, u64>,
    interval: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl GarbageCollectManager {
    /// Create a stopped manager over the given shard clients.
    pub fn new(stores: Vec<Arc<dyn StoreClient>>, interval: Duration) -> Self {
        GarbageCollectManager {
            stores,
            reports: DashMap::new(),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Record a frontend's minimum in-use query snapshot. Last write wins.
    pub fn put(&self, frontend_id: FrontendId, snapshot_id: u64) {
        self.reports.insert(frontend_id, snapshot_id);
    }

    /// One broadcast round: compute the floor and push it to every shard.
    /// Does nothing until at least one frontend has reported. A per-shard
    /// RPC failure is logged and does not abort the round for other shards.
    pub fn collect_once(&self) {
        let minimum = self.reports.iter().map(|entry| *entry.value()).min();
        let floor = match minimum {
            Some(min) => min.saturating_sub(1),
            None => return,
        };
        debug!(floor, frontends = self.reports.len(), "broadcasting gc floor");
        for (index, store) in self.stores.iter().enumerate() {
            let store = Arc::clone(store);
            fire_and_forget(&format!("store-gc-{}", index), move || {
                if let Err(e) = store.synchronize_min_query_snapshot(floor) {
                    warn!(shard = index, floor, error = %e, "gc floor broadcast failed");
                }
            });
        }
    }

    /// Start the periodic broadcast loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let manager = Arc::clone(self);
        let task = PeriodicTask::spawn("gc-broadcast", self.interval, move || {
            manager.collect_once();
        })?;
        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Stop the periodic broadcast loop.
    pub fn stop(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::contract::PartitionStatistics;
    use lattice_core::error::Error;
    use lattice_core::GraphDef;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    struct FakeStore {
        min_snapshot: AtomicU64,
        calls: AtomicU64,
    }

    impl FakeStore {
        fn new() -> Self {
            FakeStore {
                min_snapshot: AtomicU64::new(u64::MAX),
                calls: AtomicU64::new(0),
            }
        }
    }

    impl StoreClient for FakeStore {
        fn synchronize_min_query_snapshot(&self, snapshot_id: u64) -> Result<()> {
            self.min_snapshot.store(snapshot_id, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn fetch_schema(&self) -> Result<GraphDef> {
            Err(Error::Rpc("not implemented".to_string()))
        }
        fn fetch_statistics(&self) -> Result<HashMap<u32, PartitionStatistics>> {
            Ok(HashMap::new())
        }
    }

    fn wait_for(predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !predicate() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(predicate());
    }

    #[test]
    fn floor_is_minimum_report_minus_one() {
        let stores: Vec<Arc<FakeStore>> = (0..2).map(|_| Arc::new(FakeStore::new())).collect();
        let gc = GarbageCollectManager::new(
            stores.iter().map(|s| Arc::clone(s) as _).collect(),
            Duration::from_secs(60),
        );
        gc.put(1, 10);
        gc.put(2, 7);
        gc.put(3, 12);
        gc.collect_once();

        for store in &stores {
            let store = Arc::clone(store);
            wait_for(move || store.min_snapshot.load(Ordering::SeqCst) == 6);
        }
    }

    #[test]
    fn no_broadcast_before_any_report() {
        let store = Arc::new(FakeStore::new());
        let gc = GarbageCollectManager::new(vec![Arc::clone(&store) as _], Duration::from_secs(60));
        gc.collect_once();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn out_of_order_report_is_last_write_wins() {
        let store = Arc::new(FakeStore::new());
        let gc = GarbageCollectManager::new(vec![Arc::clone(&store) as _], Duration::from_secs(60));
        gc.put(1, 10);
        gc.put(1, 8); // stale report, still accepted
        gc.collect_once();
        wait_for(move || store.min_snapshot.load(Ordering::SeqCst) == 7);
    }

    #[test]
    fn failing_shard_does_not_abort_the_round() {
        struct DeadStore;
        impl StoreClient for DeadStore {
            fn synchronize_min_query_snapshot(&self, _snapshot_id: u64) -> Result<()> {
                Err(Error::Rpc("unreachable".to_string()))
            }
            fn fetch_schema(&self) -> Result<GraphDef> {
                Err(Error::Rpc("unreachable".to_string()))
            }
            fn fetch_statistics(&self) -> Result<HashMap<u32, PartitionStatistics>> {
                Err(Error::Rpc("unreachable".to_string()))
            }
        }

        let healthy = Arc::new(FakeStore::new());
        let gc = GarbageCollectManager::new(
            vec![Arc::new(DeadStore) as _, Arc::clone(&healthy) as _],
            Duration::from_secs(60),
        );
        gc.put(1, 5);
        gc.collect_once();
        wait_for(move || healthy.min_snapshot.load(Ordering::SeqCst) == 4);
    }
}
