//! Unified error type for the coordination core.
//!
//! Expected failures (a peer unreachable, a manager not ready, a missing
//! checkpoint key) are ordinary variants that callers handle with `?`.
//! Invariant violations discovered while loading persisted state get the
//! dedicated [`Error::RecoveryInvariant`] variant: a coordinator that sees
//! one must refuse to start serving.

use thiserror::Error;

/// All coordinator errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No valid copy of a checkpoint key exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// A checkpoint key exists but no slot holds a valid copy.
    #[error("corrupt checkpoint state: {0}")]
    Corrupt(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding of persisted state failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The manager cannot accept the operation yet (e.g. schema manager
    /// between a failure and the next successful reconciliation).
    #[error("not ready: {0}")]
    NotReady(String),

    /// A remote peer call failed. Isolated to the peer; never fatal.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The caller passed something structurally invalid (unknown shard id,
    /// wrong-length offset vector, empty DDL batch).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A DDL batch could not be applied to the current schema.
    #[error("ddl error: {0}")]
    Ddl(String),

    /// Persisted state violates a startup invariant. Fatal: the process
    /// must not begin serving.
    #[error("recovery invariant violated: {0}")]
    RecoveryInvariant(String),

    /// The coordinator is shutting down; the operation was dropped.
    #[error("shutting down")]
    ShuttingDown,

    /// Internal error (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that must prevent the coordinator from serving.
    ///
    /// These are persisted-invariant violations and unrecoverable checkpoint
    /// corruption, never transient peer failures.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RecoveryInvariant(_) | Error::Corrupt(_) | Error::Internal(_)
        )
    }

    /// True if the error only reflects a transient peer failure.
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, Error::Rpc(_))
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        Error::Serialization(e.to_string())
    }
}
