//! # fieldsync-sync: Offline Queues and Document Cache for FieldSync
//!
//! Keeps a field rep's app working while connectivity comes and goes, and
//! makes sure every action taken offline eventually reaches the remote
//! store.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FieldSync Sync Layer                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  FieldSync (composition root)                    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  UploadQueue   │  │   DataQueue    │  │   DocumentCache        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Staged photos  │  │ Visits, sheets │  │ Catalogs and brochures │    │
//! │  │ and files,     │  │ expenses and   │  │ for offline viewing,   │    │
//! │  │ bounded        │  │ attendance,    │  │ size accounting        │    │
//! │  │ concurrency    │  │ one at a time  │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │                   │                       │                  │
//! │  ┌───────▼───────────────────▼───────┐   ┌──────────▼─────────────┐    │
//! │  │ QueueCore + StatusBroadcaster     │   │ StatusBroadcaster      │    │
//! │  └───────────────┬───────────────────┘   └──────────┬─────────────┘    │
//! │                  │                                   │                  │
//! │  ┌───────────────▼───────────────────────────────────▼─────────────┐   │
//! │  │  fieldsync-db: ItemStore (SQLite) + LocalFileStore (blobs)     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Remote side: UploadTransport • RemoteWriter • DocumentDownloader      │
//! │  (HttpRemoteStore in production, scripted fakes in tests)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`services`] - `FieldSync` composition root and builder
//! - [`upload`] - Attachment upload queue
//! - [`data`] - Structured record queue
//! - [`documents`] - Offline document cache
//! - [`queue`] - Queue engine shared by both queues
//! - [`broadcast`] - Per-queue snapshot subscriptions
//! - [`transport`] - Remote collaborator traits
//! - [`http`] - `reqwest` implementation of the remote collaborators
//! - [`config`] - TOML configuration with environment overrides
//! - [`error`] - Sync error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fieldsync_db::{Database, DbConfig, LocalFileStore};
//! use fieldsync_sync::{FieldSyncBuilder, HttpRemoteStore, RemoteStore, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.storage.database_path())).await?;
//! let remote = RemoteStore::from_single(Arc::new(HttpRemoteStore::from_config(&config)?));
//!
//! let sync = FieldSyncBuilder::new(config.clone())
//!     .with_database(db)
//!     .with_files(LocalFileStore::new(config.storage.files_dir()))
//!     .with_remote(remote)
//!     .build()?;
//! sync.init().await?;
//!
//! let id = sync.data().enqueue(EntityType::Expense, json!({ "amount": 500 })).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod broadcast;
pub mod config;
pub mod data;
pub mod documents;
pub mod error;
pub mod http;
pub mod queue;
pub mod services;
pub mod transport;
pub mod upload;

// =============================================================================
// Re-exports
// =============================================================================

pub use broadcast::{Snapshot, StatusBroadcaster, Subscription};
pub use config::{
    CacheSettings, DataSettings, DeviceConfig, RemoteSettings, StorageSettings, SyncConfig,
    UploadSettings,
};
pub use data::DataQueue;
pub use documents::{DocumentCache, ReconcileReport};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemoteStore;
pub use queue::{ProcessSummary, RehydrationReport};
pub use services::{FieldSync, FieldSyncBuilder, InitReport};
pub use transport::{
    ContentUriResolver, DocumentDownloader, DownloadMeta, DownloadProgress, FileUriResolver,
    RemoteStore, RemoteWriter, UploadTransport,
};
pub use upload::UploadQueue;
