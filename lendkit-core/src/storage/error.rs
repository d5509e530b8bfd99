//! Error types for identity storage.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by identity stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An identity is already stored under this id.
    #[error("identity already exists: {id}")]
    AlreadyExists {
        /// The identity id.
        id: String,
    },

    /// The id cannot be used as a store key.
    #[error("invalid identity id {id:?}: {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An in-process lock was poisoned.
    #[error("storage lock error: {0}")]
    Lock(String),
}

pub(crate) fn io_error(context: impl Into<String>, source: std::io::Error) -> StorageError {
    StorageError::Io {
        context: context.into(),
        source,
    }
}
