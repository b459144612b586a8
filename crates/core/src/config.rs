//! Coordinator behavior/configuration knobs.

use std::time::Duration;

/// Configuration for the coordination core.
///
/// Intervals are plain milliseconds; accessors return [`Duration`] for use
/// with the periodic task runner. Defaults match a small deployment and are
/// safe to tighten in tests.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of storage shards. Also the number of durable log queues.
    pub shard_count: usize,
    /// Fixed delay between write-snapshot advances.
    pub snapshot_increase_interval_ms: u64,
    /// Fixed delay between queue-offset floor persists.
    pub offset_persist_interval_ms: u64,
    /// Backoff between schema reconciliation attempts while not ready.
    pub ddl_recovery_interval_ms: u64,
    /// Fixed delay between garbage-collection floor broadcasts.
    pub gc_interval_ms: u64,
    /// Whether the log recycler runs at all.
    pub log_recycle_enabled: bool,
    /// Fixed delay between log recycle rounds.
    pub log_recycle_interval_ms: u64,
    /// Offset head-room kept in front of the delete floor, per queue.
    pub log_recycle_offset_reserve: u64,
    /// Whether the statistics broadcast runs at all.
    pub statistics_sync_enabled: bool,
    /// Fixed delay between statistics broadcast rounds.
    pub statistics_sync_interval_ms: u64,
    /// Read-replica mode: compute in-memory state but suppress every
    /// persistence side effect (checkpoint writes, log deletion).
    pub secondary: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            snapshot_increase_interval_ms: 1_000,
            offset_persist_interval_ms: 3_000,
            ddl_recovery_interval_ms: 1_000,
            gc_interval_ms: 5_000,
            log_recycle_enabled: false,
            log_recycle_interval_ms: 60_000,
            log_recycle_offset_reserve: 86_400,
            statistics_sync_enabled: false,
            statistics_sync_interval_ms: 30_000,
            secondary: false,
        }
    }
}

impl CoordinatorConfig {
    /// Configuration with the given shard count and defaults elsewhere.
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self {
            shard_count,
            ..Default::default()
        }
    }

    /// Delay between write-snapshot advances.
    pub fn snapshot_increase_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_increase_interval_ms)
    }

    /// Delay between queue-offset floor persists.
    pub fn offset_persist_interval(&self) -> Duration {
        Duration::from_millis(self.offset_persist_interval_ms)
    }

    /// Backoff between schema reconciliation attempts.
    pub fn ddl_recovery_interval(&self) -> Duration {
        Duration::from_millis(self.ddl_recovery_interval_ms)
    }

    /// Delay between GC floor broadcasts.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    /// Delay between log recycle rounds.
    pub fn log_recycle_interval(&self) -> Duration {
        Duration::from_millis(self.log_recycle_interval_ms)
    }

    /// Delay between statistics broadcast rounds.
    pub fn statistics_sync_interval(&self) -> Duration {
        Duration::from_millis(self.statistics_sync_interval_ms)
    }
}
