//! Persisted monotonic id allocation
//!
//! Hands out contiguous ranges of ids backed by the checkpoint store. The
//! new tail is persisted before any id from the range is returned
//! (persist-then-commit), so a crash can waste a range but never reissue one.

use crate::meta_store::MetaStore;
use lattice_core::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Checkpoint key holding the encoded id tail.
pub const ID_ALLOCATE_INFO_KEY: &str = "id_allocate_info";

/// Allocator of monotonically increasing integer ranges.
pub struct IdAllocator {
    store: Arc<dyn MetaStore>,
    tail: Mutex<u64>,
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator").finish_non_exhaustive()
    }
}

impl IdAllocator {
    /// Recover the allocator from persisted state.
    ///
    /// Fails fatally if no tail was ever persisted: a missing tail on a
    /// store that is supposed to be initialized means ids may already be in
    /// circulation, and restarting from zero would reissue them. First-run
    /// setup goes through [`IdAllocator::bootstrap`] instead.
    pub fn recover(store: Arc<dyn MetaStore>) -> Result<Self> {
        let bytes = store.read(ID_ALLOCATE_INFO_KEY).map_err(|e| match e {
            Error::NotFound(_) => Error::RecoveryInvariant(
                "id allocator tail was never persisted; bootstrap required".to_string(),
            ),
            other => other,
        })?;
        let tail: u64 = bincode::deserialize(&bytes)?;
        info!(tail, "id allocator recovered");
        Ok(IdAllocator {
            store,
            tail: Mutex::new(tail),
        })
    }

    /// First-run setup: persist a zero tail.
    ///
    /// Refuses to run over an already-initialized store.
    pub fn bootstrap(store: Arc<dyn MetaStore>) -> Result<Self> {
        if store.exists(ID_ALLOCATE_INFO_KEY) {
            return Err(Error::InvalidArgument(
                "id allocator already initialized".to_string(),
            ));
        }
        store.write(ID_ALLOCATE_INFO_KEY, &bincode::serialize(&0u64)?)?;
        Ok(IdAllocator {
            store,
            tail: Mutex::new(0),
        })
    }

    /// Allocate `size` ids, returning the new tail.
    ///
    /// The returned value is the end of the allocated range: the caller owns
    /// ids `(new_tail - size, new_tail]`. The tail is persisted before it is
    /// committed in memory or returned.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::InvalidArgument("allocation size must be > 0".to_string()));
        }
        let mut tail = self.tail.lock();
        let new_tail = tail
            .checked_add(size)
            .ok_or_else(|| Error::Internal("id space exhausted".to_string()))?;
        self.store
            .write(ID_ALLOCATE_INFO_KEY, &bincode::serialize(&new_tail)?)?;
        *tail = new_tail;
        Ok(new_tail)
    }

    /// Current tail (end of the last allocated range).
    pub fn tail(&self) -> u64 {
        *self.tail.lock()
    }
}
