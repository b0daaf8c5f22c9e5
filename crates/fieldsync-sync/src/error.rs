//! # Sync Error Types
//!
//! Error types for queue processing, document caching and the remote store.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Transient      │  │   Permanent     │  │     Local Storage       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Transport      │  │  PermanentRemote│  │  LocalStorage           │ │
//! │  │  Timeout        │  │  (4xx rejects)  │  │  (disk full, missing)   │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  → item failed, │  │  → item failed, │  │  → returned to caller,  │ │
//! │  │    retry works  │  │    needs fix    │  │    never queued         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Caller        │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  InvalidInput   │  │  ChannelError           │ │
//! │  │  MissingDeviceId│  │  NotFound       │  │  ShuttingDown           │ │
//! │  │  InvalidUrl     │  │                 │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! Errors raised while a background worker processes an item are recorded
//! in the item's `last_error` and travel to the UI through the snapshot
//! stream. Errors from direct calls (enqueue, download, delete) are returned.

use fieldsync_core::CoreError;
use fieldsync_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Network unreachable, connection reset, 5xx, 408 or 429.
    ///
    /// ## When This Occurs
    /// - Device is offline or on a captive portal
    /// - Remote store is overloaded
    #[error("Transient transport error: {0}")]
    TransientTransport(String),

    /// A transfer ran past its deadline.
    #[error("Transfer timed out after {0} seconds")]
    Timeout(u64),

    /// The remote store rejected the request as invalid.
    ///
    /// Retrying will not help until the local data is corrected.
    #[error("Remote store rejected the request ({status}): {message}")]
    PermanentRemote { status: u16, message: String },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Item store or file store failure.
    #[error("Local storage error: {0}")]
    LocalStorage(#[from] DbError),

    /// The caller passed a value that cannot be queued.
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] CoreError),

    /// Referenced item or document does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Failed to serialize or deserialize a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required to tag remote writes).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The service is shutting down.
    #[error("Sync service is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

/// Convert reqwest errors to SyncError.
///
/// ## Error Mapping
/// ```text
/// timeout                         → SyncError::TransientTransport
/// status 408 / 429 / 5xx          → SyncError::TransientTransport
/// other status                    → SyncError::PermanentRemote
/// connect / request / body        → SyncError::TransientTransport
/// builder (bad URL, bad header)   → SyncError::InvalidConfig
/// ```
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SyncError::TransientTransport(format!("request timed out: {}", err));
        }
        if let Some(status) = err.status() {
            return SyncError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_builder() {
            return SyncError::InvalidConfig(err.to_string());
        }
        SyncError::TransientTransport(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => {
                SyncError::TransientTransport(format!("HTTP {}: {}", status, message))
            }
            _ => SyncError::PermanentRemote { status, message },
        }
    }

    /// Returns true if a manual retry can succeed without changing local data.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientTransport(_) | SyncError::Timeout(_)
        )
    }

    /// Returns true if the remote store rejected the request outright.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SyncError::PermanentRemote { .. })
    }

    /// Returns true if the error came from local disk or database.
    pub fn is_local_storage(&self) -> bool {
        matches!(self, SyncError::LocalStorage(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
