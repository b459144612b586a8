//! Coordinator assembly and lifecycle
//!
//! Wires the snapshot manager, schema manager, garbage collection, log
//! recycling, statistics and frontend notification together behind one
//! handle. Built through [`CoordinatorBuilder`]; opened against recovered
//! state or bootstrapped on first run; started and shut down as a unit.
//!
//! A secondary (read-replica) coordinator mirrors all in-memory state but
//! owns nothing: checkpoint writes, log deletion, GC broadcasts, statistics
//! pushes, DDL execution and id allocation are all suppressed.

use crate::gc::GarbageCollectManager;
use crate::notify::FrontendNotifier;
use crate::recycler::LogRecycler;
use crate::schema::{DdlCallback, SchemaManager};
use crate::statistics::StatisticsBroadcaster;
use lattice_core::contract::{FrontendClient, IngestorClient, LogService, StoreClient};
use lattice_core::error::{Error, Result};
use lattice_core::{CoordinatorConfig, DdlRequestBatch, FrontendId, GraphDef, ShardId, SnapshotInfo};
use lattice_durability::{IdAllocator, MetaStore};
use lattice_snapshot::{ListenerId, SnapshotListener, SnapshotManager};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

enum BuildMode {
    Open,
    Bootstrap,
}

/// Builder for [`Coordinator`].
///
/// ```ignore
/// let coordinator = CoordinatorBuilder::new(CoordinatorConfig::with_shard_count(2))
///     .meta_store(meta)
///     .log_service(log)
///     .store(shard_a)
///     .store(shard_b)
///     .frontend(frontend)
///     .bootstrap()?;
/// coordinator.start()?;
/// ```
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    meta: Option<Arc<dyn MetaStore>>,
    log: Option<Arc<dyn LogService>>,
    stores: Vec<Arc<dyn StoreClient>>,
    frontends: Vec<Arc<dyn FrontendClient>>,
    ingestors: Vec<Arc<dyn IngestorClient>>,
}

impl CoordinatorBuilder {
    /// Start building a coordinator with the given configuration.
    pub fn new(config: CoordinatorConfig) -> Self {
        CoordinatorBuilder {
            config,
            meta: None,
            log: None,
            stores: Vec::new(),
            frontends: Vec::new(),
            ingestors: Vec::new(),
        }
    }

    /// Set the checkpoint store backing all persisted state. Required.
    pub fn meta_store(mut self, meta: Arc<dyn MetaStore>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the durable log service. Required.
    pub fn log_service(mut self, log: Arc<dyn LogService>) -> Self {
        self.log = Some(log);
        self
    }

    /// Add one shard client. Exactly `shard_count` clients are required, in
    /// shard-id order.
    pub fn store(mut self, store: Arc<dyn StoreClient>) -> Self {
        self.stores.push(store);
        self
    }

    /// Add one frontend client.
    pub fn frontend(mut self, frontend: Arc<dyn FrontendClient>) -> Self {
        self.frontends.push(frontend);
        self
    }

    /// Add one ingestor client.
    pub fn ingestor(mut self, ingestor: Arc<dyn IngestorClient>) -> Self {
        self.ingestors.push(ingestor);
        self
    }

    /// Open against previously persisted state. Fatal errors
    /// ([`Error::is_fatal`]) mean the coordinator must not serve.
    pub fn open(self) -> Result<Coordinator> {
        self.assemble(BuildMode::Open)
    }

    /// First-run setup: seed all persisted state, then open.
    pub fn bootstrap(self) -> Result<Coordinator> {
        self.assemble(BuildMode::Bootstrap)
    }

    fn assemble(self, mode: BuildMode) -> Result<Coordinator> {
        let meta = self
            .meta
            .ok_or_else(|| Error::InvalidArgument("meta store is required".to_string()))?;
        let log = self
            .log
            .ok_or_else(|| Error::InvalidArgument("log service is required".to_string()))?;
        if self.stores.len() != self.config.shard_count {
            return Err(Error::InvalidArgument(format!(
                "{} store clients for {} shards",
                self.stores.len(),
                self.config.shard_count
            )));
        }

        let config = self.config;
        let (snapshots, ids) = match mode {
            BuildMode::Open => (
                SnapshotManager::recover(
                    Arc::clone(&meta),
                    log.as_ref(),
                    &config,
                    self.ingestors.clone(),
                )?,
                IdAllocator::recover(Arc::clone(&meta))?,
            ),
            BuildMode::Bootstrap => (
                SnapshotManager::bootstrap(Arc::clone(&meta), &config, self.ingestors.clone())?,
                IdAllocator::bootstrap(Arc::clone(&meta))?,
            ),
        };
        let snapshots = Arc::new(snapshots);

        let schema = Arc::new(SchemaManager::new(
            Arc::clone(&snapshots),
            Arc::clone(&log),
            self.stores.clone(),
            config.ddl_recovery_interval(),
        ));
        let gc = Arc::new(GarbageCollectManager::new(
            self.stores.clone(),
            config.gc_interval(),
        ));
        let recycler = if config.log_recycle_enabled && !config.secondary {
            Some(Arc::new(LogRecycler::new(
                Arc::clone(&snapshots),
                Arc::clone(&log),
                config.log_recycle_offset_reserve,
                config.log_recycle_interval(),
            )))
        } else {
            None
        };
        let statistics = if config.statistics_sync_enabled && !config.secondary {
            Some(Arc::new(StatisticsBroadcaster::new(
                self.stores.clone(),
                self.frontends.clone(),
                config.statistics_sync_interval(),
            )))
        } else {
            None
        };
        let notifier = Arc::new(FrontendNotifier::new(
            self.frontends.clone(),
            Arc::clone(&schema),
        ));

        info!(
            shard_count = config.shard_count,
            frontends = self.frontends.len(),
            secondary = config.secondary,
            "coordinator assembled"
        );
        Ok(Coordinator {
            config,
            snapshots,
            schema,
            gc,
            recycler,
            statistics,
            notifier,
            ids,
            notifier_listener: Mutex::new(None),
        })
    }
}

/// The assembled coordination core. One per coordinator process.
pub struct Coordinator {
    config: CoordinatorConfig,
    snapshots: Arc<SnapshotManager>,
    schema: Arc<SchemaManager>,
    gc: Arc<GarbageCollectManager>,
    recycler: Option<Arc<LogRecycler>>,
    statistics: Option<Arc<StatisticsBroadcaster>>,
    notifier: Arc<FrontendNotifier>,
    ids: IdAllocator,
    notifier_listener: Mutex<Option<ListenerId>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("secondary", &self.config.secondary)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Start every periodic loop and the DDL pipeline, and subscribe the
    /// frontend notifier to snapshot advancement.
    pub fn start(&self) -> Result<()> {
        self.snapshots.start()?;
        self.schema.start()?;
        if !self.config.secondary {
            self.gc.start()?;
        }
        if let Some(recycler) = &self.recycler {
            recycler.start()?;
        }
        if let Some(statistics) = &self.statistics {
            statistics.start()?;
        }
        let listener = Arc::clone(&self.notifier) as Arc<dyn SnapshotListener>;
        *self.notifier_listener.lock() = Some(self.snapshots.add_listener(listener));
        info!("coordinator started");
        Ok(())
    }

    /// Orderly shutdown: stop every loop (bounded join), drain the DDL
    /// worker, drop outstanding one-shot listeners unfulfilled.
    pub fn shutdown(&self) {
        if let Some(id) = self.notifier_listener.lock().take() {
            self.snapshots.remove_listener(id);
        }
        if let Some(statistics) = &self.statistics {
            statistics.stop();
        }
        if let Some(recycler) = &self.recycler {
            recycler.stop();
        }
        self.gc.stop();
        self.schema.stop();
        self.snapshots.stop();
        info!("coordinator stopped");
    }

    // ------------------------------------------------------------------
    // RPC-facing entry points
    // ------------------------------------------------------------------

    /// Shard → coordinator: apply-progress report.
    pub fn report_apply_progress(
        &self,
        shard_id: ShardId,
        snapshot_id: u64,
        ddl_snapshot_id: u64,
        queue_offsets: Vec<u64>,
    ) -> Result<()> {
        self.snapshots
            .commit_snapshot_id(shard_id, snapshot_id, ddl_snapshot_id, queue_offsets)
    }

    /// Client → coordinator: DDL submission. Completion is delivered
    /// through `callback` once the change is query-visible (or rejected).
    pub fn submit_batch_ddl(
        &self,
        request_id: String,
        session_id: String,
        batch: DdlRequestBatch,
        callback: DdlCallback,
    ) {
        if self.config.secondary {
            callback(Err(Error::NotReady(
                "secondary coordinator does not accept ddl".to_string(),
            )));
            return;
        }
        self.schema.submit_batch_ddl(request_id, session_id, batch, callback);
    }

    /// Frontend → coordinator: minimum query snapshot still in use.
    pub fn report_minimum_snapshot(&self, frontend_id: FrontendId, snapshot_id: u64) {
        self.gc.put(frontend_id, snapshot_id);
    }

    /// Client → coordinator: allocate a range of ids, returning the new
    /// tail.
    pub fn allocate_ids(&self, size: u64) -> Result<u64> {
        if self.config.secondary {
            return Err(Error::NotReady(
                "secondary coordinator does not allocate ids".to_string(),
            ));
        }
        self.ids.allocate(size)
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    /// The published query-visible snapshot.
    pub fn query_snapshot_info(&self) -> SnapshotInfo {
        self.snapshots.query_snapshot_info()
    }

    /// The query-visible schema.
    pub fn graph_def(&self) -> Arc<GraphDef> {
        self.schema.graph_def()
    }

    /// The persisted per-queue delete floor.
    pub fn queue_offsets(&self) -> Vec<u64> {
        self.snapshots.get_queue_offsets()
    }

    /// Handle to the snapshot manager, for components layered on top.
    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Handle to the schema manager.
    pub fn schema_manager(&self) -> &Arc<SchemaManager> {
        &self.schema
    }

    /// Handle to the frontend notifier.
    pub fn frontend_notifier(&self) -> &Arc<FrontendNotifier> {
        &self.notifier
    }
}
