//! Durable checkpoint state for the coordinator
//!
//! This crate implements the two pieces of coordinator state that must
//! survive a crash:
//! - [`MetaStore`]: small named byte blobs with double-slot, CRC-checked
//!   writes so a crash mid-write always leaves one intact copy
//! - [`IdAllocator`]: a monotonic id tail persisted before any id is handed
//!   out (persist-then-commit)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod id_allocator;
pub mod meta_store;

pub use id_allocator::IdAllocator;
pub use meta_store::{FileMetaStore, MemoryMetaStore, MetaStore};
