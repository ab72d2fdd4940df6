//! Error types for the attempt store and environment locks.

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in local orchestrator state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("attempt already recorded: {0}")]
    AlreadyRecorded(String),

    #[error("deployment already in progress for {0}")]
    Locked(String),

    #[error("lock io error: {0}")]
    LockIo(#[from] std::io::Error),
}
