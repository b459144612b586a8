//! Coordinator engine for the lattice graph store
//!
//! Assembles the snapshot manager with everything layered on top of it:
//! - [`SchemaManager`]: the single-threaded DDL pipeline bound to snapshots
//! - [`GarbageCollectManager`]: aggregates frontend floors, pushes the safe
//!   reclaim point to every shard
//! - [`LogRecycler`]: deletes log segments behind the durable offset floor
//! - [`FrontendNotifier`]: pushes snapshot/schema advancement to frontends
//! - [`StatisticsBroadcaster`]: fans shard statistics out to frontends
//! - [`Coordinator`]: lifecycle and RPC-facing entry points for all of it

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod gc;
pub mod notify;
pub mod recycler;
pub mod schema;
pub mod statistics;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use gc::GarbageCollectManager;
pub use notify::FrontendNotifier;
pub use recycler::LogRecycler;
pub use schema::{DdlCallback, SchemaManager};
pub use statistics::StatisticsBroadcaster;
