//! Snapshot manager: the coordinator's clock and convergence engine
//!
//! Owns the write-snapshot counter and the query-visible snapshot. Shard
//! progress reports flow in through [`SnapshotManager::commit_snapshot_id`];
//! the manager recomputes the global minimum, persists it, and fires
//! listeners. Schema changes take the write-snapshot lock through
//! [`SnapshotManager::lock_write_snapshot`] so a batch and its id bind
//! atomically.
//!
//! ## Locking
//!
//! Two independent locks:
//! - the write lock (`write_snapshot`) serializes id allocation and anything
//!   that must append under a just-read id;
//! - the progress lock (`progress`) serializes shard reports, listener
//!   registration and query-snapshot recomputation.
//!
//! Shard reporting never takes the write lock, so reporting never blocks on
//! DDL submission or vice versa. Listener callbacks run after the progress
//! lock is released; a listener may re-enter the manager.
//!
//! ## Persistence ordering
//!
//! Every counter is persisted before it is committed in memory or made
//! observable (write-ahead-of-effect). A failed checkpoint write fails the
//! triggering operation and leaves the in-memory state untouched.

use crate::listener::{ListenerId, SnapshotCallback, SnapshotListener};
use crate::task::{fire_and_forget, PeriodicTask};
use lattice_core::contract::{IngestorClient, LogService};
use lattice_core::error::{Error, Result};
use lattice_core::{CoordinatorConfig, QueueId, ShardId, SnapshotInfo};
use lattice_durability::MetaStore;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Checkpoint key for the write-snapshot counter.
pub const WRITE_SNAPSHOT_ID_KEY: &str = "write_snapshot_id";
/// Checkpoint key for the query-visible snapshot pair.
pub const QUERY_SNAPSHOT_INFO_KEY: &str = "query_snapshot_info";
/// Checkpoint key for the queue-offset floor vector.
pub const QUEUE_OFFSETS_KEY: &str = "queue_offsets";

/// State guarded by the progress lock.
struct ProgressState {
    /// Published query-visible snapshot.
    query_snapshot: SnapshotInfo,
    /// Latest snapshot reported by each shard. Entries only move forward.
    shard_snapshots: FxHashMap<ShardId, SnapshotInfo>,
    /// Latest per-queue durable offsets reported by each shard.
    shard_offsets: FxHashMap<ShardId, Vec<u64>>,
    /// Persisted per-queue delete floor (min across shards, monotonic).
    queue_offsets: Vec<u64>,
    /// One-shot callbacks keyed by target snapshot id.
    one_shot: BTreeMap<u64, Vec<SnapshotCallback>>,
    /// Persistent subscribers.
    persistent: Vec<(ListenerId, Arc<dyn SnapshotListener>)>,
    next_listener_id: ListenerId,
}

/// Listener work collected under the progress lock, fired after release.
struct Advancement {
    info: SnapshotInfo,
    one_shot: BTreeMap<u64, Vec<SnapshotCallback>>,
    persistent: Vec<Arc<dyn SnapshotListener>>,
}

/// The central clock of the coordination core. See the module docs.
pub struct SnapshotManager {
    meta: Arc<dyn MetaStore>,
    shard_count: usize,
    secondary: bool,
    snapshot_increase_interval: Duration,
    offset_persist_interval: Duration,
    write_snapshot: Mutex<u64>,
    progress: Mutex<ProgressState>,
    ingestors: Vec<Arc<dyn IngestorClient>>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("shard_count", &self.shard_count)
            .field("secondary", &self.secondary)
            .finish_non_exhaustive()
    }
}

impl SnapshotManager {
    /// Recover the manager from persisted state.
    ///
    /// Fatal ([`Error::RecoveryInvariant`]) if any key is missing, the query
    /// snapshot is ahead of the write snapshot, the offset vector length
    /// does not match the shard count, or any recovered offset can no longer
    /// be opened for reading on its queue. A coordinator seeing any of these
    /// must not start serving.
    pub fn recover(
        meta: Arc<dyn MetaStore>,
        log: &dyn LogService,
        config: &CoordinatorConfig,
        ingestors: Vec<Arc<dyn IngestorClient>>,
    ) -> Result<Self> {
        let write_snapshot: u64 = read_state(meta.as_ref(), WRITE_SNAPSHOT_ID_KEY)?;
        let query_snapshot: SnapshotInfo = read_state(meta.as_ref(), QUERY_SNAPSHOT_INFO_KEY)?;
        let queue_offsets: Vec<u64> = read_state(meta.as_ref(), QUEUE_OFFSETS_KEY)?;

        if query_snapshot.snapshot_id > write_snapshot {
            return Err(Error::RecoveryInvariant(format!(
                "query snapshot {} is ahead of write snapshot {}",
                query_snapshot.snapshot_id, write_snapshot
            )));
        }
        if queue_offsets.len() != config.shard_count {
            return Err(Error::RecoveryInvariant(format!(
                "recovered {} queue offsets for {} shards",
                queue_offsets.len(),
                config.shard_count
            )));
        }
        for (queue, offset) in queue_offsets.iter().enumerate() {
            log.check_readable(queue as QueueId, *offset).map_err(|e| {
                Error::RecoveryInvariant(format!(
                    "recovered offset {} for queue {} is not readable: {}",
                    offset, queue, e
                ))
            })?;
        }

        info!(
            write_snapshot,
            query_snapshot = %query_snapshot,
            "snapshot manager recovered"
        );
        Ok(Self::assemble(
            meta,
            config,
            ingestors,
            write_snapshot,
            query_snapshot,
            queue_offsets,
        ))
    }

    /// First-run setup: seed all snapshot state at zero.
    ///
    /// Refuses to run over an already-initialized store, and refuses to run
    /// on a secondary (a read replica never owns the persisted state).
    pub fn bootstrap(
        meta: Arc<dyn MetaStore>,
        config: &CoordinatorConfig,
        ingestors: Vec<Arc<dyn IngestorClient>>,
    ) -> Result<Self> {
        if config.secondary {
            return Err(Error::InvalidArgument(
                "cannot bootstrap a secondary coordinator".to_string(),
            ));
        }
        for key in [WRITE_SNAPSHOT_ID_KEY, QUERY_SNAPSHOT_INFO_KEY, QUEUE_OFFSETS_KEY] {
            if meta.exists(key) {
                return Err(Error::InvalidArgument(format!(
                    "snapshot state already initialized: key {} exists",
                    key
                )));
            }
        }
        let query_snapshot = SnapshotInfo::new(0, 0);
        let queue_offsets = vec![0u64; config.shard_count];
        meta.write(WRITE_SNAPSHOT_ID_KEY, &bincode::serialize(&0u64)?)?;
        meta.write(QUERY_SNAPSHOT_INFO_KEY, &bincode::serialize(&query_snapshot)?)?;
        meta.write(QUEUE_OFFSETS_KEY, &bincode::serialize(&queue_offsets)?)?;
        info!(shard_count = config.shard_count, "snapshot state bootstrapped");
        Ok(Self::assemble(meta, config, ingestors, 0, query_snapshot, queue_offsets))
    }

    fn assemble(
        meta: Arc<dyn MetaStore>,
        config: &CoordinatorConfig,
        ingestors: Vec<Arc<dyn IngestorClient>>,
        write_snapshot: u64,
        query_snapshot: SnapshotInfo,
        queue_offsets: Vec<u64>,
    ) -> Self {
        SnapshotManager {
            meta,
            shard_count: config.shard_count,
            secondary: config.secondary,
            snapshot_increase_interval: config.snapshot_increase_interval(),
            offset_persist_interval: config.offset_persist_interval(),
            write_snapshot: Mutex::new(write_snapshot),
            progress: Mutex::new(ProgressState {
                query_snapshot,
                shard_snapshots: FxHashMap::default(),
                shard_offsets: FxHashMap::default(),
                queue_offsets,
                one_shot: BTreeMap::new(),
                persistent: Vec::new(),
                next_listener_id: 0,
            }),
            ingestors,
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Write snapshot
    // ------------------------------------------------------------------

    /// Take the write-snapshot lock.
    ///
    /// While the guard is held, no other caller can advance the counter, so
    /// reading the current id and appending a batch bound to a fresh id form
    /// one atomic sequence.
    pub fn lock_write_snapshot(&self) -> WriteSnapshotGuard<'_> {
        WriteSnapshotGuard {
            manager: self,
            slot: self.write_snapshot.lock(),
        }
    }

    /// Advance the write snapshot by one and return the new id.
    pub fn increase_write_snapshot_id(&self) -> Result<u64> {
        let mut guard = self.lock_write_snapshot();
        guard.advance()
    }

    /// Current write snapshot id (the next id is this plus one).
    pub fn write_snapshot_id(&self) -> u64 {
        *self.write_snapshot.lock()
    }

    fn persist_write_snapshot(&self, value: u64) -> Result<()> {
        if self.secondary {
            return Ok(());
        }
        self.meta
            .write(WRITE_SNAPSHOT_ID_KEY, &bincode::serialize(&value)?)
    }

    /// Tell every ingestor the new write ceiling. One dispatch thread per
    /// ingestor; a failed or stalled ingestor only delays itself.
    fn notify_ingestors(&self, snapshot_id: u64) {
        for (index, ingestor) in self.ingestors.iter().enumerate() {
            let ingestor = Arc::clone(ingestor);
            fire_and_forget(&format!("ingestor-{}", index), move || {
                match ingestor.advance_ingest_snapshot_id(snapshot_id) {
                    Ok(previous) => {
                        debug!(ingestor = index, snapshot_id, previous, "ingest ceiling advanced")
                    }
                    Err(e) => {
                        warn!(ingestor = index, snapshot_id, error = %e, "ingest ceiling advance failed")
                    }
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Shard progress and query snapshot
    // ------------------------------------------------------------------

    /// Record a shard's apply progress and durable queue offsets, then
    /// recompute the query snapshot.
    ///
    /// Tables only move forward: a report older than the stored snapshot for
    /// that shard is ignored, and offsets below the stored ones are ignored
    /// entry-wise. The query snapshot advances only once every shard has
    /// reported at least once.
    pub fn commit_snapshot_id(
        &self,
        shard_id: ShardId,
        snapshot_id: u64,
        ddl_snapshot_id: u64,
        offsets: Vec<u64>,
    ) -> Result<()> {
        if shard_id as usize >= self.shard_count {
            return Err(Error::InvalidArgument(format!(
                "unknown shard {} (shard count {})",
                shard_id, self.shard_count
            )));
        }
        if offsets.len() != self.shard_count {
            return Err(Error::InvalidArgument(format!(
                "shard {} reported {} queue offsets, expected {}",
                shard_id,
                offsets.len(),
                self.shard_count
            )));
        }

        let reported = SnapshotInfo::new(snapshot_id, ddl_snapshot_id);
        let advancement = {
            let mut state = self.progress.lock();
            match state.shard_snapshots.entry(shard_id) {
                Entry::Occupied(mut entry) => {
                    if reported.snapshot_id < entry.get().snapshot_id {
                        debug!(shard_id, reported = %reported, stored = %entry.get(), "stale shard report ignored");
                    } else {
                        *entry.get_mut() = reported;
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(reported);
                }
            }
            let stored_offsets = state
                .shard_offsets
                .entry(shard_id)
                .or_insert_with(|| vec![0; offsets.len()]);
            for (stored, reported) in stored_offsets.iter_mut().zip(&offsets) {
                *stored = (*stored).max(*reported);
            }
            self.maybe_advance_query_snapshot(&mut state)?
        };

        if let Some(advancement) = advancement {
            self.fire_listeners(advancement);
        }
        Ok(())
    }

    /// Recompute the query snapshot from the per-shard table; persist and
    /// collect listener work if it advanced. Runs under the progress lock.
    fn maybe_advance_query_snapshot(
        &self,
        state: &mut ProgressState,
    ) -> Result<Option<Advancement>> {
        if state.shard_snapshots.len() < self.shard_count {
            warn!(
                reported = state.shard_snapshots.len(),
                shard_count = self.shard_count,
                "query snapshot held back: not all shards have reported"
            );
            return Ok(None);
        }
        let minimum = match state.shard_snapshots.values().min() {
            Some(min) => *min,
            None => return Ok(None),
        };
        if minimum.snapshot_id <= state.query_snapshot.snapshot_id {
            return Ok(None);
        }

        // A shard that failed over may briefly under-report its ddl
        // snapshot; the published value never regresses.
        let next = SnapshotInfo::new(
            minimum.snapshot_id,
            minimum.ddl_snapshot_id.max(state.query_snapshot.ddl_snapshot_id),
        );
        if !self.secondary {
            self.meta
                .write(QUERY_SNAPSHOT_INFO_KEY, &bincode::serialize(&next)?)?;
        }
        state.query_snapshot = next;

        let remaining = state.one_shot.split_off(&next.snapshot_id.saturating_add(1));
        let due = std::mem::replace(&mut state.one_shot, remaining);
        let persistent = state.persistent.iter().map(|(_, l)| Arc::clone(l)).collect();
        debug!(query_snapshot = %next, released = due.len(), "query snapshot advanced");
        Ok(Some(Advancement {
            info: next,
            one_shot: due,
            persistent,
        }))
    }

    /// Fire collected listeners, one-shots first in increasing target order,
    /// then every persistent subscriber. Runs outside the progress lock. A
    /// panicking listener is logged and isolated.
    fn fire_listeners(&self, advancement: Advancement) {
        let info = advancement.info;
        for (target, callbacks) in advancement.one_shot {
            for callback in callbacks {
                if catch_unwind(AssertUnwindSafe(move || callback(info))).is_err() {
                    error!(target, "snapshot callback panicked");
                }
            }
        }
        for listener in advancement.persistent {
            if catch_unwind(AssertUnwindSafe(|| listener.on_snapshot_advanced(info))).is_err() {
                error!("snapshot listener panicked");
            }
        }
    }

    /// The currently published query-visible snapshot.
    pub fn query_snapshot_info(&self) -> SnapshotInfo {
        self.progress.lock().query_snapshot
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a one-shot callback for when the query snapshot reaches
    /// `target`. Invoked synchronously if it already has.
    pub fn add_snapshot_listener(&self, target: u64, callback: SnapshotCallback) {
        let mut state = self.progress.lock();
        if state.query_snapshot.snapshot_id >= target {
            let info = state.query_snapshot;
            drop(state);
            callback(info);
        } else {
            state.one_shot.entry(target).or_default().push(callback);
        }
    }

    /// Register a persistent listener, replaying the current snapshot once
    /// immediately so no initial state is missed.
    pub fn add_listener(&self, listener: Arc<dyn SnapshotListener>) -> ListenerId {
        let (id, info) = {
            let mut state = self.progress.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.persistent.push((id, Arc::clone(&listener)));
            (id, state.query_snapshot)
        };
        listener.on_snapshot_advanced(info);
        id
    }

    /// Deregister a persistent listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.progress.lock().persistent.retain(|(lid, _)| *lid != id);
    }

    // ------------------------------------------------------------------
    // Queue offsets
    // ------------------------------------------------------------------

    /// The persisted per-queue delete floor.
    pub fn get_queue_offsets(&self) -> Vec<u64> {
        self.progress.lock().queue_offsets.clone()
    }

    /// Recompute the per-queue floor as the minimum across all shards'
    /// reports and persist it if it moved. The floor never regresses. Held
    /// back until every shard has reported offsets at least once.
    pub fn persist_queue_offsets(&self) -> Result<()> {
        let mut state = self.progress.lock();
        if state.shard_offsets.len() < self.shard_count {
            debug!(
                reported = state.shard_offsets.len(),
                shard_count = self.shard_count,
                "offset floor held back: not all shards have reported"
            );
            return Ok(());
        }
        let mut floor = vec![u64::MAX; self.shard_count];
        for offsets in state.shard_offsets.values() {
            for (entry, offset) in floor.iter_mut().zip(offsets) {
                *entry = (*entry).min(*offset);
            }
        }
        for (entry, current) in floor.iter_mut().zip(&state.queue_offsets) {
            *entry = (*entry).max(*current);
        }
        if floor == state.queue_offsets {
            return Ok(());
        }
        if !self.secondary {
            self.meta.write(QUEUE_OFFSETS_KEY, &bincode::serialize(&floor)?)?;
        }
        debug!(?floor, "queue offset floor persisted");
        state.queue_offsets = floor;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the two periodic loops (write-snapshot advance, offset
    /// persistence). Both log and continue on error.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(Error::Internal("snapshot manager already started".to_string()));
        }

        let manager = Arc::clone(self);
        tasks.push(PeriodicTask::spawn(
            "snapshot-increase",
            self.snapshot_increase_interval,
            move || {
                if let Err(e) = manager.increase_write_snapshot_id() {
                    warn!(error = %e, "periodic write snapshot advance failed");
                }
            },
        )?);

        let manager = Arc::clone(self);
        tasks.push(PeriodicTask::spawn(
            "offset-persist",
            self.offset_persist_interval,
            move || {
                if let Err(e) = manager.persist_queue_offsets() {
                    warn!(error = %e, "periodic offset persistence failed");
                }
            },
        )?);
        Ok(())
    }

    /// Stop the periodic loops. Outstanding one-shot listeners are dropped,
    /// not fulfilled.
    pub fn stop(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &mut tasks {
            task.stop();
        }
        self.progress.lock().one_shot.clear();
    }
}

/// RAII guard over the write-snapshot lock.
///
/// Holding the guard pins the counter: [`WriteSnapshotGuard::current`] reads
/// it and [`WriteSnapshotGuard::advance`] persists and commits the next id.
/// Ingestor notification is dispatched asynchronously from `advance` and
/// never blocks the holder.
pub struct WriteSnapshotGuard<'a> {
    manager: &'a SnapshotManager,
    slot: MutexGuard<'a, u64>,
}

impl WriteSnapshotGuard<'_> {
    /// The current write snapshot id.
    pub fn current(&self) -> u64 {
        *self.slot
    }

    /// Persist and commit the next write snapshot id, then notify ingestors
    /// asynchronously. On persistence failure the counter is unchanged.
    pub fn advance(&mut self) -> Result<u64> {
        let next = self
            .slot
            .checked_add(1)
            .ok_or_else(|| Error::Internal("write snapshot id exhausted".to_string()))?;
        self.manager.persist_write_snapshot(next)?;
        *self.slot = next;
        self.manager.notify_ingestors(next);
        Ok(next)
    }
}

fn read_state<T: serde::de::DeserializeOwned>(meta: &dyn MetaStore, key: &str) -> Result<T> {
    let bytes = meta.read(key).map_err(|e| match e {
        Error::NotFound(_) => Error::RecoveryInvariant(format!(
            "checkpoint key {} was never persisted; bootstrap required",
            key
        )),
        other => other,
    })?;
    Ok(bincode::deserialize(&bytes)?)
}
