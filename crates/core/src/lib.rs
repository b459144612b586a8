//! Core types for the lattice coordinator
//!
//! This crate defines the fundamental vocabulary shared by every layer of the
//! coordination core:
//! - [`SnapshotInfo`]: the (snapshot, ddl snapshot) pair that orders the system
//! - [`GraphDef`] and [`DdlRequestBatch`]: the schema model moved by DDL
//! - [`Error`] / [`Result`]: the unified error type
//! - [`CoordinatorConfig`]: behavior knobs for the coordinator
//! - [`contract`]: trait contracts for the external collaborators (shards,
//!   frontends, ingestors, the durable log)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod contract;
pub mod error;
pub mod graph;
pub mod types;

pub use config::CoordinatorConfig;
pub use contract::{FrontendClient, IngestorClient, LogService, PartitionStatistics, StoreClient};
pub use error::{Error, Result};
pub use graph::{DdlRequest, DdlRequestBatch, GraphDef, LabelDef, LabelKind, PropertyDef};
pub use types::{FrontendId, QueueId, ShardId, SnapshotInfo};
