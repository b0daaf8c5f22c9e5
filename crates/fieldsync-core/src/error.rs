//! # Error Types
//!
//! Domain-specific error types for fieldsync-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fieldsync-core errors (this file)                                     │
//! │  └── CoreError        - Invalid queue input / unknown enum values      │
//! │                                                                         │
//! │  fieldsync-db errors (separate crate)                                  │
//! │  └── DbError          - Item store and file store failures             │
//! │                                                                         │
//! │  fieldsync-sync errors (separate crate)                                │
//! │  └── SyncError        - Transport / remote / local storage taxonomy    │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → UI (retry affordance or toast)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while building or parsing queue/cache values.
///
/// These are caller mistakes caught before anything touches storage, so
/// they are always returned synchronously to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Entity type string is not one of the supported kinds.
    ///
    /// ## When This Occurs
    /// - Persisted item written by a newer app version
    /// - UI passes a free-form string
    #[error("Unknown entity type: '{0}'. Valid options: visit, sheets, expense, attendance")]
    UnknownEntityType(String),

    /// Queue status string is not recognised.
    #[error("Unknown queue status: '{0}'")]
    UnknownStatus(String),

    /// Remote target descriptor is incomplete.
    #[error("Invalid remote target: {0}")]
    InvalidRemoteTarget(String),

    /// A local file reference is empty.
    #[error("Local URI must not be empty")]
    EmptyLocalUri,

    /// A document operation names no document.
    #[error("Document id must not be empty")]
    EmptyDocumentId,

    /// A data queue payload carries no record.
    #[error("Payload for {entity_type} must not be null")]
    EmptyPayload { entity_type: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownEntityType("invoice".into());
        assert!(err.to_string().contains("invoice"));

        let err = CoreError::EmptyPayload {
            entity_type: "expense".into(),
        };
        assert_eq!(err.to_string(), "Payload for expense must not be null");
    }
}
