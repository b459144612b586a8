//! Statistics fan-out
//!
//! Periodically pulls per-partition statistics from every shard, merges
//! them, and pushes the merged view to every frontend so query planning
//! sees fresh cardinalities. Config-gated; entirely best-effort.

use lattice_core::contract::{FrontendClient, PartitionStatistics, StoreClient};
use lattice_core::error::Result;
use lattice_snapshot::{fire_and_forget, PeriodicTask};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fans merged shard statistics out to frontends.
pub struct StatisticsBroadcaster {
    stores: Vec<Arc<dyn StoreClient>>,
    frontends: Vec<Arc<dyn FrontendClient>>,
    interval: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl StatisticsBroadcaster {
    /// Create a stopped broadcaster.
    pub fn new(
        stores: Vec<Arc<dyn StoreClient>>,
        frontends: Vec<Arc<dyn FrontendClient>>,
        interval: Duration,
    ) -> Self {
        StatisticsBroadcaster {
            stores,
            frontends,
            interval,
            task: Mutex::new(None),
        }
    }

    /// One fetch-merge-push round. Per-peer failure is logged; a shard that
    /// fails to answer simply contributes nothing this round.
    pub fn sync_once(&self) {
        let mut merged: HashMap<u32, PartitionStatistics> = HashMap::new();
        for (index, store) in self.stores.iter().enumerate() {
            match store.fetch_statistics() {
                Ok(partitions) => {
                    for (partition, stats) in partitions {
                        let entry = merged.entry(partition).or_default();
                        entry.num_vertices += stats.num_vertices;
                        entry.num_edges += stats.num_edges;
                    }
                }
                Err(e) => warn!(shard = index, error = %e, "statistics fetch failed"),
            }
        }
        if merged.is_empty() {
            return;
        }
        debug!(partitions = merged.len(), "broadcasting statistics");
        for (index, frontend) in self.frontends.iter().enumerate() {
            let frontend = Arc::clone(frontend);
            let merged = merged.clone();
            fire_and_forget(&format!("frontend-stats-{}", index), move || {
                if let Err(e) = frontend.sync_statistics(&merged) {
                    warn!(frontend = index, error = %e, "statistics push failed");
                }
            });
        }
    }

    /// Start the periodic broadcast loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let broadcaster = Arc::clone(self);
        let task = PeriodicTask::spawn("statistics-sync", self.interval, move || {
            broadcaster.sync_once();
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
