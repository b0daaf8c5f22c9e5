//! # FieldSync Services
//!
//! Composition root bundling the three offline services over one database,
//! one file store and one set of remote collaborators.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            FieldSync                                    │
//! │                                                                         │
//! │   SyncConfig ─┐                                                        │
//! │   Database ───┼──► FieldSyncBuilder::build()                           │
//! │   FileStore ──┤          │                                              │
//! │   RemoteStore ┘          ├──► UploadQueue   (uploads + file store)      │
//! │                          ├──► DataQueue     (writer)                    │
//! │                          └──► DocumentCache (downloader + resolver)     │
//! │                                                                         │
//! │   init()     → rehydrate both queues, reconcile the cache, start       │
//! │                the queue workers                                       │
//! │   shutdown() → stop the workers after their current pass              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use fieldsync_db::{Database, LocalFileStore};
use tracing::info;

use crate::config::SyncConfig;
use crate::data::DataQueue;
use crate::documents::{DocumentCache, ReconcileReport};
use crate::error::{SyncError, SyncResult};
use crate::queue::RehydrationReport;
use crate::transport::RemoteStore;
use crate::upload::UploadQueue;

/// What `init()` found on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub uploads: RehydrationReport,
    pub data: RehydrationReport,
    pub documents: ReconcileReport,
}

/// The upload queue, data queue and document cache of one device.
#[derive(Clone)]
pub struct FieldSync {
    uploads: UploadQueue,
    data: DataQueue,
    documents: DocumentCache,
}

impl FieldSync {
    /// Loads persisted state and starts the background workers.
    ///
    /// Idempotent.
    pub async fn init(&self) -> SyncResult<InitReport> {
        let uploads = self.uploads.init().await?;
        let data = self.data.init().await?;
        let documents = self.documents.init().await?;

        info!(
            pending_uploads = uploads.loaded,
            pending_records = data.loaded,
            cached_documents = documents.documents,
            "FieldSync initialised"
        );

        Ok(InitReport {
            uploads,
            data,
            documents,
        })
    }

    /// Stops both queue workers. In-flight transfers finish first.
    pub async fn shutdown(&self) {
        self.uploads.shutdown().await;
        self.data.shutdown().await;
        info!("FieldSync stopped");
    }

    pub fn uploads(&self) -> &UploadQueue {
        &self.uploads
    }

    pub fn data(&self) -> &DataQueue {
        &self.data
    }

    pub fn documents(&self) -> &DocumentCache {
        &self.documents
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`FieldSync`].
pub struct FieldSyncBuilder {
    config: SyncConfig,
    db: Option<Database>,
    files: Option<LocalFileStore>,
    remote: Option<RemoteStore>,
}

impl FieldSyncBuilder {
    pub fn new(config: SyncConfig) -> Self {
        FieldSyncBuilder {
            config,
            db: None,
            files: None,
            remote: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_files(mut self, files: LocalFileStore) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_remote(mut self, remote: RemoteStore) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Validates the config and wires the three services.
    ///
    /// ## Errors
    /// `SyncError::InvalidConfig` if the config is invalid or a piece is
    /// missing.
    pub fn build(self) -> SyncResult<FieldSync> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let files = self
            .files
            .ok_or_else(|| SyncError::InvalidConfig("File store required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;

        Ok(FieldSync {
            uploads: UploadQueue::new(
                &db,
                files.clone(),
                remote.uploads,
                self.config.upload.clone(),
            ),
            data: DataQueue::new(&db, remote.writer, self.config.data.clone()),
            documents: DocumentCache::new(
                &db,
                files,
                remote.downloader,
                remote.resolver,
                self.config.cache.clone(),
            ),
        })
    }
}
