//! LatticeDB coordination core.
//!
//! The single logical authority of a sharded, write-ahead-logged graph
//! store: it manufactures globally ordered snapshot identifiers, serializes
//! schema changes against those identifiers, tracks how far each storage
//! shard has durably applied writes, and gives dependent services a
//! consistent, monotonically advancing view of system progress across
//! process restarts.
//!
//! # Example
//!
//! ```ignore
//! use latticedb::prelude::*;
//!
//! let meta = Arc::new(FileMetaStore::open("./coordinator-meta")?);
//! let coordinator = CoordinatorBuilder::new(CoordinatorConfig::with_shard_count(2))
//!     .meta_store(meta)
//!     .log_service(log)
//!     .store(shard_a)
//!     .store(shard_b)
//!     .frontend(frontend)
//!     .bootstrap()?;
//!
//! coordinator.start()?;
//! // ... serve RPCs: report_apply_progress, submit_batch_ddl, ...
//! coordinator.shutdown();
//! ```
//!
//! Storage shards, query frontends, write ingestors and the durable log are
//! external collaborators consumed through the traits in
//! [`lattice_core::contract`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod prelude;

pub use lattice_core::contract::{
    FrontendClient, IngestorClient, LogService, PartitionStatistics, StoreClient,
};
pub use lattice_core::{
    CoordinatorConfig, DdlRequest, DdlRequestBatch, Error, FrontendId, GraphDef, LabelDef,
    LabelKind, PropertyDef, QueueId, Result, ShardId, SnapshotInfo,
};
pub use lattice_durability::{FileMetaStore, IdAllocator, MemoryMetaStore, MetaStore};
pub use lattice_engine::{Coordinator, CoordinatorBuilder, DdlCallback};
pub use lattice_snapshot::{SnapshotListener, SnapshotManager};
