//! Preference error types

use storage::StorageError;
use thiserror::Error;

/// Preference error types
#[derive(Debug, Error)]
pub enum PreferencesError {
    /// No item is stored for the key
    #[error("Item not found: key '{key}' in module '{module}'")]
    ItemNotFound {
        /// Module that was searched
        module: String,
        /// Requested key
        key: String,
    },

    /// The stored value cannot be read as the requested type
    #[error("Wrong type: {0}")]
    WrongType(String),

    /// Caller misuse, e.g. a version below 1
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Operation not possible in the current state, e.g. a missing upgrade path
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The version check failed and the requested write was refused
    #[error("Changing module '{module}' to version {version} failed: {source}")]
    VersionChange {
        /// Module being versioned
        module: String,
        /// Target version
        version: i32,
        /// Why the change failed
        #[source]
        source: Box<PreferencesError>,
    },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error while reading or writing a legacy source file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A legacy source file could not be parsed or written
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for preference operations
pub type Result<T> = std::result::Result<T, PreferencesError>;

impl PreferencesError {
    /// Whether this is [`PreferencesError::ItemNotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, PreferencesError::ItemNotFound { .. })
    }
}
