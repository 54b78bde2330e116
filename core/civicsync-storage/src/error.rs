//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
///
/// Callers of a bounded store treat every variant the same way: the cache is
/// unavailable for this call.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Payload (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store cannot be reached at all (lock poisoned, worker gone, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Invalid data or configuration.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Shorthand for [`StorageError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}
