//! Storage error types

use thiserror::Error;

/// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLx error
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Write attempted on a storage that is not bound to a partition
    #[error("Module '{module}' is unclassified and can only be read or deleted")]
    Classification {
        /// Module the write was aimed at
        module: String,
    },

    /// Caller misuse, e.g. an empty key
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Backing store could not be reached
    #[error("Storage unreachable: {0}")]
    Unreachable(String),

    /// Stored data could not be decoded
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Schema migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StorageError::Unreachable(err.to_string())
            }
            err => StorageError::Database(err),
        }
    }
}

impl StorageError {
    pub(crate) fn classification(module: &str) -> Self {
        Self::Classification { module: module.to_string() }
    }
}

/// Rejects the empty key, which no backend can address.
pub(crate) fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidArgument("key must not be empty".to_string()));
    }
    Ok(())
}
