//! Storage error types
//!
//! Defines all errors that can occur in the device data store.

use thiserror::Error;

/// Errors that can occur in the store
#[derive(Error, Debug)]
pub enum StorageError {
    /// The connection string could not be understood or opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// SQLite reported a failure
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// The running statement was interrupted (cancelled or timed out)
    #[error("Query interrupted")]
    Interrupted,

    /// A stored document is not a JSON object
    #[error("Malformed document #{seq}: {reason}")]
    MalformedDocument { seq: i64, reason: String },

    /// Serialization of a document failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The blocking worker running the query failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                StorageError::Interrupted
            }
            other => StorageError::Sqlite(other),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
