//! Schema (DDL) pipeline
//!
//! All schema changes flow through one dedicated worker thread, making the
//! total order of DDL a structural guarantee rather than a lock-discipline
//! one. Each accepted batch is bound to a freshly allocated write snapshot
//! id while the write-snapshot lock is held, appended to the write-ahead
//! pipeline under that id, and becomes visible when the query snapshot
//! reaches it.
//!
//! ## Failure and reconciliation
//!
//! Any failure while executing a batch flips the manager to not-ready and
//! surfaces an error to the submitting client. A periodic reconciliation
//! loop then self-heals: request a fresh write snapshot, wait until it is
//! globally visible, fetch the authoritative schema from a shard (the
//! in-memory cache is never trusted across a failure) and reinstall it
//! through the worker before accepting DDL again. The same path initializes
//! the schema at startup.

use lattice_core::contract::{LogService, StoreClient};
use lattice_core::error::{Error, Result};
use lattice_core::{DdlRequestBatch, GraphDef};
use lattice_snapshot::{fire_and_forget, PeriodicTask, SnapshotManager};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Completion handler for a DDL submission. Receives the snapshot id the
/// batch was bound to once the change is query-visible, or the error that
/// rejected it.
pub type DdlCallback = Box<dyn FnOnce(Result<u64>) + Send>;

/// How long a reconciliation attempt waits for its snapshot to become
/// globally visible before giving up and retrying on the next tick.
const RECONCILE_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(10);

enum SchemaJob {
    Execute {
        request_id: String,
        session_id: String,
        batch: DdlRequestBatch,
        callback: DdlCallback,
    },
    Install {
        def: GraphDef,
    },
}

/// Serializes all DDL through a single-threaded pipeline bound to the
/// snapshot order. See the module docs.
pub struct SchemaManager {
    snapshots: Arc<SnapshotManager>,
    log: Arc<dyn LogService>,
    stores: Vec<Arc<dyn StoreClient>>,
    /// Query-visible schema. Swapped atomically by the snapshot listener
    /// when a bound batch becomes visible.
    visible: RwLock<Arc<GraphDef>>,
    ready: AtomicBool,
    stopping: AtomicBool,
    recovery_interval: Duration,
    sender: Mutex<Option<Sender<SchemaJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    recovery_task: Mutex<Option<PeriodicTask>>,
}

impl SchemaManager {
    /// Create a stopped manager. Not ready until the first reconciliation
    /// completes after [`SchemaManager::start`].
    pub fn new(
        snapshots: Arc<SnapshotManager>,
        log: Arc<dyn LogService>,
        stores: Vec<Arc<dyn StoreClient>>,
        recovery_interval: Duration,
    ) -> Self {
        SchemaManager {
            snapshots,
            log,
            stores,
            visible: RwLock::new(Arc::new(GraphDef::empty())),
            ready: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            recovery_interval,
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            recovery_task: Mutex::new(None),
        }
    }

    /// Whether DDL submissions are currently accepted.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// The query-visible schema.
    pub fn graph_def(&self) -> Arc<GraphDef> {
        Arc::clone(&self.visible.read())
    }

    /// Submit a DDL batch. Completion (success with the bound snapshot id,
    /// or rejection) is delivered through `callback`; a not-ready manager
    /// rejects immediately.
    pub fn submit_batch_ddl(
        &self,
        request_id: String,
        session_id: String,
        batch: DdlRequestBatch,
        callback: DdlCallback,
    ) {
        if !self.is_ready() {
            callback(Err(Error::NotReady(
                "schema manager is reconciling".to_string(),
            )));
            return;
        }
        debug!(request_id, session_id, requests = batch.requests.len(), "ddl batch submitted");
        let job = SchemaJob::Execute {
            request_id,
            session_id,
            batch,
            callback,
        };
        let result = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx.send(job),
                // Never started, or already stopped.
                None => Err(SendError(job)),
            }
        };
        if let Err(SendError(SchemaJob::Execute { callback, .. })) = result {
            callback(Err(Error::ShuttingDown));
        }
    }

    /// Start the DDL worker and the reconciliation loop, and kick an
    /// immediate reconciliation attempt.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        {
            let mut sender = self.sender.lock();
            if sender.is_some() {
                return Err(Error::Internal("schema manager already started".to_string()));
            }
            *sender = Some(tx);
        }
        self.stopping.store(false, Ordering::Release);

        let manager = Arc::clone(self);
        *self.worker.lock() = Some(
            thread::Builder::new()
                .name("ddl-worker".to_string())
                .spawn(move || manager.run_worker(rx))?,
        );

        let manager = Arc::clone(self);
        *self.recovery_task.lock() = Some(PeriodicTask::spawn(
            "schema-recovery",
            self.recovery_interval,
            move || manager.reconcile_if_needed(),
        )?);

        let manager = Arc::clone(self);
        fire_and_forget("schema-initial-recover", move || {
            manager.reconcile_if_needed()
        });
        Ok(())
    }

    /// Stop the reconciliation loop and drain the DDL worker. In-flight
    /// submissions complete with [`Error::ShuttingDown`] only if they were
    /// never enqueued; enqueued jobs are processed before the worker exits.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Some(mut task) = self.recovery_task.lock().take() {
            task.stop();
        }
        // Dropping the sender closes the channel; the worker exits once the
        // queue is drained.
        self.sender.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("ddl worker panicked before shutdown");
            }
        }
    }

    // ------------------------------------------------------------------
    // Worker
    // ------------------------------------------------------------------

    fn run_worker(self: Arc<Self>, jobs: Receiver<SchemaJob>) {
        // The working copy is the schema as of the last bound batch,
        // possibly ahead of the visible one. Only this thread mutates it,
        // so batches compose sequentially without extra locking.
        let mut working = GraphDef::empty();
        while let Ok(job) = jobs.recv() {
            match job {
                SchemaJob::Install { def } => {
                    working = def.clone();
                    *self.visible.write() = Arc::new(def);
                    self.ready.store(true, Ordering::Release);
                    info!(schema_version = working.schema_version, "schema installed, accepting ddl");
                }
                SchemaJob::Execute {
                    request_id,
                    session_id,
                    batch,
                    callback,
                } => {
                    if !self.is_ready() {
                        callback(Err(Error::NotReady(
                            "schema manager is reconciling".to_string(),
                        )));
                        continue;
                    }
                    match self.execute_ddl(&mut working, &batch) {
                        Ok((snapshot_id, new_def)) => {
                            debug!(request_id, session_id, snapshot_id, "ddl batch bound");
                            let manager = Arc::clone(&self);
                            let new_def = Arc::new(new_def);
                            self.snapshots.add_snapshot_listener(
                                snapshot_id,
                                Box::new(move |_| {
                                    *manager.visible.write() = new_def;
                                    callback(Ok(snapshot_id));
                                }),
                            );
                        }
                        Err(e) => {
                            error!(request_id, session_id, error = %e, "ddl batch failed; schema manager now reconciling");
                            self.ready.store(false, Ordering::Release);
                            callback(Err(e));
                        }
                    }
                }
            }
        }
    }

    /// Compute the successor schema, bind it to a fresh write snapshot id
    /// and append the batch under that id. The write-snapshot lock is held
    /// across allocation and append so no concurrent advance can slip an id
    /// between them.
    fn execute_ddl(&self, working: &mut GraphDef, batch: &DdlRequestBatch) -> Result<(u64, GraphDef)> {
        let mut new_def = working.apply_batch(batch)?;
        let snapshot_id = {
            let mut guard = self.snapshots.lock_write_snapshot();
            let snapshot_id = guard.advance()?;
            self.log.append_ddl(snapshot_id, batch)?;
            snapshot_id
        };
        new_def.schema_version = snapshot_id;
        *working = new_def.clone();
        Ok((snapshot_id, new_def))
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn reconcile_if_needed(&self) {
        if self.is_ready() {
            return;
        }
        match self.reconcile() {
            Ok(()) => info!("schema reconciliation succeeded"),
            Err(e) => warn!(error = %e, "schema reconciliation failed; will retry"),
        }
    }

    /// One reconciliation attempt: fresh snapshot, wait for global
    /// visibility, fetch the authoritative schema from a shard, reinstall.
    fn reconcile(&self) -> Result<()> {
        let target = self.snapshots.increase_write_snapshot_id()?;
        let (tx, rx) = mpsc::channel();
        self.snapshots.add_snapshot_listener(
            target,
            Box::new(move |info| {
                let _ = tx.send(info);
            }),
        );
        // Wait in short slices so shutdown never hangs behind a silent
        // shard.
        let deadline = Instant::now() + RECONCILE_VISIBILITY_TIMEOUT;
        loop {
            if self.stopping.load(Ordering::Acquire) {
                return Err(Error::ShuttingDown);
            }
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(_) => break,
                Err(_) if Instant::now() < deadline => continue,
                Err(_) => {
                    return Err(Error::NotReady(format!(
                        "snapshot {} not yet visible on every shard",
                        target
                    )))
                }
            }
        }

        let def = self.fetch_schema_from_any_shard()?;
        let sender = self.sender.lock();
        let tx = sender.as_ref().ok_or(Error::ShuttingDown)?;
        tx.send(SchemaJob::Install { def })
            .map_err(|_| Error::ShuttingDown)
    }

    fn fetch_schema_from_any_shard(&self) -> Result<GraphDef> {
        for (index, store) in self.stores.iter().enumerate() {
            match store.fetch_schema() {
                Ok(def) => {
                    debug!(shard = index, schema_version = def.schema_version, "fetched authoritative schema");
                    return Ok(def);
                }
                Err(e) => warn!(shard = index, error = %e, "schema fetch failed"),
            }
        }
        Err(Error::Rpc("no shard returned a schema".to_string()))
    }
}
