//! # Storage Error Types
//!
//! Error types for item store and file store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  sqlx::Error / std::io::Error / serde_json::Error                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds path/namespace context                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::LocalStorage (sync crate) ← Returned to the caller         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UI shows "storage problem" immediately (never queued)                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Local storage errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// An item body could not be encoded or decoded.
    #[error("Item {key} in {namespace} could not be (de)serialized: {message}")]
    Serialization {
        namespace: String,
        key: String,
        message: String,
    },

    /// A file the caller referenced does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// File system operation failed.
    ///
    /// ## When This Occurs
    /// - Disk full while writing a blob
    /// - Permission denied on the files directory
    #[error("File operation failed for {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal storage error.
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl DbError {
    /// Wraps an I/O error with the path it happened on.
    ///
    /// `NotFound` becomes [`DbError::FileNotFound`] so callers can match on it.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            DbError::FileNotFound(path)
        } else {
            DbError::FileIo { path, source }
        }
    }

    /// Creates a serialization error for an item.
    pub fn serialization(
        namespace: impl Into<String>,
        key: impl Into<String>,
        err: serde_json::Error,
    ) -> Self {
        DbError::Serialization {
            namespace: namespace.into(),
            key: key.into(),
            message: err.to_string(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database       → DbError::QueryFailed
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::ConnectionFailed
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),
            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for storage operations.
pub type DbResult<T> = Result<T, DbError>;
