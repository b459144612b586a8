//! Convenience re-exports for coordinator embedders.
//!
//! ```ignore
//! use latticedb::prelude::*;
//! ```

pub use crate::{
    Coordinator, CoordinatorBuilder, CoordinatorConfig, DdlRequest, DdlRequestBatch, Error,
    FileMetaStore, FrontendClient, GraphDef, IngestorClient, LabelDef, LabelKind, LogService,
    MemoryMetaStore, MetaStore, PropertyDef, Result, SnapshotInfo, SnapshotListener, StoreClient,
};
pub use std::sync::Arc;
