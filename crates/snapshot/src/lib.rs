//! Snapshot coordination for the lattice coordinator
//!
//! This crate owns the system's clock:
//! - [`SnapshotManager`]: allocates write snapshot ids, aggregates per-shard
//!   apply progress into the query-visible snapshot, maintains the durable
//!   queue-offset floor, and drives the two periodic loops
//! - [`SnapshotListener`] / one-shot callbacks: how the rest of the system
//!   observes snapshot advancement
//! - [`PeriodicTask`] and [`fire_and_forget`]: the small scheduling
//!   primitives shared with the engine crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod listener;
pub mod manager;
pub mod task;

pub use listener::{ListenerId, SnapshotCallback, SnapshotListener};
pub use manager::{SnapshotManager, WriteSnapshotGuard};
pub use task::{fire_and_forget, PeriodicTask};
