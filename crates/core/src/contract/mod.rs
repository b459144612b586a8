//! Trait contracts for the coordinator's external collaborators
//!
//! The durable log, the storage shards, the query frontends and the write
//! ingestors are all remote services. The coordinator consumes them only
//! through these traits; transport, timeouts and retries live behind the
//! implementations. All calls are made from dispatch threads the coordinator
//! spawns, never from inside a periodic loop, so a slow implementation can
//! delay its own peer's notification but never the coordinator itself.

use crate::error::Result;
use crate::graph::{DdlRequestBatch, GraphDef};
use crate::types::{QueueId, SnapshotInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-partition statistics reported by a shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatistics {
    /// Vertices stored in the partition.
    pub num_vertices: u64,
    /// Edges stored in the partition.
    pub num_edges: u64,
}

/// Client handle for one storage shard.
pub trait StoreClient: Send + Sync {
    /// Tell the shard the lowest query snapshot any frontend may still read,
    /// so versions below it are safe to reclaim.
    fn synchronize_min_query_snapshot(&self, snapshot_id: u64) -> Result<()>;

    /// Fetch the shard's authoritative copy of the current schema.
    fn fetch_schema(&self) -> Result<GraphDef>;

    /// Fetch per-partition statistics from the shard.
    fn fetch_statistics(&self) -> Result<HashMap<u32, PartitionStatistics>>;
}

/// Client handle for one query frontend.
pub trait FrontendClient: Send + Sync {
    /// Push an advanced query snapshot, with the new schema attached when the
    /// ddl snapshot moved. Returns the snapshot id the frontend was at
    /// before, which acts as its acknowledgement.
    fn advance_query_snapshot(&self, snapshot: SnapshotInfo, schema: Option<&GraphDef>)
        -> Result<u64>;

    /// Push merged per-partition statistics.
    fn sync_statistics(&self, statistics: &HashMap<u32, PartitionStatistics>) -> Result<()>;
}

/// Client handle for one write ingestor.
pub trait IngestorClient: Send + Sync {
    /// Tell the ingestor the new write-snapshot ceiling. Returns the
    /// ingestor's previous ceiling.
    fn advance_ingest_snapshot_id(&self, snapshot_id: u64) -> Result<u64>;
}

/// The durable append-only log, one queue per shard.
///
/// The coordinator never reads log payloads; it validates recovered offsets,
/// appends DDL batches bound to a snapshot, and deletes behind the agreed
/// durable floor.
pub trait LogService: Send + Sync {
    /// Verify that `offset` can be opened for reading on `queue`. A stale,
    /// already-recycled offset is an error.
    fn check_readable(&self, queue: QueueId, offset: u64) -> Result<()>;

    /// Append a DDL batch bound to `snapshot_id` to every queue's write
    /// pipeline.
    fn append_ddl(&self, snapshot_id: u64, batch: &DdlRequestBatch) -> Result<()>;

    /// Delete all entries of `queue` strictly before `offset`.
    fn delete_before(&self, queue: QueueId, offset: u64) -> Result<()>;
}
