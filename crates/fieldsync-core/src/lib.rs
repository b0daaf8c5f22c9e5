//! # fieldsync-core: Pure Types for the FieldSync Offline Layer
//!
//! This crate holds the data model shared by the upload queue, the data
//! queue and the document cache. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FieldSync Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Mobile UI (screens, forms)                   │   │
//! │  │    Visit form ──► Expense form ──► Photo picker ──► Catalogs    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ enqueue / subscribe                    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    fieldsync-sync                               │   │
//! │  │    UploadQueue • DataQueue • DocumentCache                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fieldsync-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   mime    │  │   error   │  │ constants │  │   │
//! │  │   │ QueueMeta │  │ declared  │  │ CoreError │  │ thresholds│  │   │
//! │  │   │ Upload/.. │  │ → MIME    │  │           │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queue items, statuses, cached documents, cache usage
//! - [`mime`] - MIME type derivation from declared file types
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use fieldsync_core::{DataQueueItem, EntityType, QueueItem, QueueStatus};
//! use serde_json::json;
//!
//! let item = DataQueueItem::new(EntityType::Expense, json!({ "amount": 500 })).unwrap();
//! assert_eq!(item.status(), QueueStatus::Pending);
//! assert_eq!(item.meta().attempt_count, 0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod mime;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::CoreError;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Cache size above which the UI shows a soft storage warning (100 MB).
pub const CACHE_SOFT_WARNING_BYTES: u64 = 100 * 1024 * 1024;

/// Cache size above which the UI shows a strong storage warning (500 MB).
pub const CACHE_STRONG_WARNING_BYTES: u64 = 500 * 1024 * 1024;
