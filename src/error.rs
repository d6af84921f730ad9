//! Error type shared by every layer of the engine.

use thiserror::Error;

use crate::access::Uid;
use crate::transaction::Xid;

/// Errors surfaced by the storage core.
#[derive(Error, Debug)]
pub enum Error {
    /// A uid, page or transaction id that is out of range or was never allocated.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Raised by caller layers (e.g. re-creating a table) through the same channel.
    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    /// The lock request would close a cycle in the wait-for graph.
    #[error("Deadlock detected: transaction {xid} must abort")]
    DeadlockDetected { xid: Xid },

    /// The target version was changed by a transaction hidden from the writer.
    #[error("Serialization failure: transaction {xid} cannot write {uid}")]
    VisibilityConflict { xid: Xid, uid: Uid },

    #[error("Corrupt storage: {0}")]
    CorruptStorage(String),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(Xid),

    #[error("Payload of {size} bytes exceeds the maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Buffer pool is full: every frame is pinned")]
    CacheFull,

    #[error("Database busy: no page with enough free space could be claimed")]
    DatabaseBusy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl Error {
    /// Lock and visibility failures: the caller aborts and may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DeadlockDetected { .. } | Error::VisibilityConflict { .. }
        )
    }

    /// Failures that cannot be handled at runtime and need recovery or an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CorruptStorage(_) | Error::Io(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
