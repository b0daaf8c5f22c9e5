//! # fieldsync-db: Local Persistence for FieldSync
//!
//! Durable storage for the offline sync layer: a namespaced key/value item
//! store on SQLite and a partitioned file store for blobs.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FieldSync Data Flow                              │
//! │                                                                         │
//! │  UploadQueue / DataQueue / DocumentCache (fieldsync-sync)              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  fieldsync-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │   ItemStore   │    │LocalFileStore│  │   │
//! │  │   │   (pool.rs)   │    │  (items.rs)   │    │  (blob.rs)   │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ one handle    │    │ .part staging│  │   │
//! │  │   │ + migrations  │    │ per namespace │    │ + rename     │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                             │                   │
//! │       ▼                                             ▼                   │
//! │  <data_dir>/fieldsync.db                  <data_dir>/files/<namespace>/ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Storage error types
//! - [`repository`] - Namespaced item store
//! - [`blob`] - Local file store with staged writes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldsync_db::{Database, DbConfig, Namespace};
//!
//! let db = Database::new(DbConfig::new("path/to/fieldsync.db")).await?;
//!
//! let uploads = db.items(Namespace::UploadQueue);
//! uploads.put(&item.meta.id, item.meta.created_at, &item).await?;
//! let all: Vec<UploadQueueItem> = uploads.list().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod blob;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use blob::{sanitize_file_name, BlobWriter, LocalFileStore, StoredBlob};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::items::{ItemStore, Namespace};
