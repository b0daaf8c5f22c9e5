//! # Document Cache
//!
//! Reference documents (catalogs, brochures) downloaded for offline viewing,
//! with storage accounting.
//!
//! ## Download Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       download_document()                               │
//! │                                                                         │
//! │  1. open staged writer   files/document_cache/.<name>-….part           │
//! │  2. stream remote bytes into it (progress callback per chunk)          │
//! │        │                                                                │
//! │        ├── error / timeout ──► .part deleted, error returned,          │
//! │        │                       no record written                        │
//! │        ▼                                                                │
//! │  3. commit → files/document_cache/<id>-<token>-<name>                  │
//! │  4. persist CachedDocument (size = bytes on disk)                      │
//! │  5. delete the previous file of this document, if any                  │
//! │  6. publish snapshot                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Size Invariant
//! The sum of `file_size_bytes` over all records equals the bytes of cached
//! files on disk. `init()` restores it after a crash by dropping records
//! whose file vanished, deleting files nobody references and correcting
//! recorded sizes.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fieldsync_core::{mime, CacheUsage, CacheWarningLevel, CachedDocument, CoreError};
use fieldsync_db::{Database, ItemStore, LocalFileStore, Namespace};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{StatusBroadcaster, Subscription};
use crate::config::CacheSettings;
use crate::error::{SyncError, SyncResult};
use crate::transport::{local_path, ContentUriResolver, DocumentDownloader, DownloadProgress};

/// Outcome of the startup reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records kept after reconciliation.
    pub documents: usize,
    /// Records whose file was missing.
    pub dropped_records: usize,
    /// Files (including stale `.part` files) with no record.
    pub removed_files: usize,
    /// Records whose stored size disagreed with the file on disk.
    pub resized: usize,
}

struct CacheState {
    docs: BTreeMap<String, CachedDocument>,
    loaded: bool,
    reconciled: bool,
}

/// Offline document cache. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct DocumentCache {
    inner: Arc<Inner>,
}

struct Inner {
    store: ItemStore,
    files: LocalFileStore,
    downloader: Arc<dyn DocumentDownloader>,
    resolver: Arc<dyn ContentUriResolver>,
    settings: CacheSettings,
    state: Mutex<CacheState>,
    /// Shared by downloads while their file is staged; exclusive for
    /// reconciliation.
    staging: RwLock<()>,
    broadcaster: StatusBroadcaster<CachedDocument>,
}

impl DocumentCache {
    pub fn new(
        db: &Database,
        files: LocalFileStore,
        downloader: Arc<dyn DocumentDownloader>,
        resolver: Arc<dyn ContentUriResolver>,
        settings: CacheSettings,
    ) -> Self {
        DocumentCache {
            inner: Arc::new(Inner {
                store: db.items(Namespace::DocumentCache),
                files,
                downloader,
                resolver,
                settings,
                state: Mutex::new(CacheState {
                    docs: BTreeMap::new(),
                    loaded: false,
                    reconciled: false,
                }),
                staging: RwLock::new(()),
                broadcaster: StatusBroadcaster::new(),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads the records and reconciles them with the files on disk.
    ///
    /// Reconciliation runs once per cache; later calls only report the
    /// current document count.
    pub async fn init(&self) -> SyncResult<ReconcileReport> {
        let _staging = self.inner.staging.write().await;
        let mut state = self.lock_loaded().await?;
        if state.reconciled {
            return Ok(ReconcileReport {
                documents: state.docs.len(),
                ..Default::default()
            });
        }

        let report = self.reconcile(&mut state).await?;
        state.reconciled = true;

        if report.dropped_records + report.removed_files + report.resized > 0 {
            warn!(
                dropped_records = report.dropped_records,
                removed_files = report.removed_files,
                resized = report.resized,
                "Document cache repaired"
            );
            self.publish(&state);
        }
        info!(documents = report.documents, "Document cache initialised");

        Ok(report)
    }

    async fn reconcile(&self, state: &mut CacheState) -> SyncResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let ids: Vec<String> = state.docs.keys().cloned().collect();

        for id in ids {
            let Some(doc) = state.docs.get(&id).cloned() else {
                continue;
            };
            let path = PathBuf::from(&doc.local_uri);

            let size = if self.inner.files.owns(Namespace::DocumentCache, &path) {
                self.inner.files.size_of(&path).await?
            } else {
                None
            };

            match size {
                None => {
                    self.inner.store.remove(&id).await?;
                    state.docs.remove(&id);
                    report.dropped_records += 1;
                    debug!(document_id = %id, "Dropped record without file");
                }
                Some(size) if size != doc.file_size_bytes => {
                    let fixed = CachedDocument {
                        file_size_bytes: size,
                        ..doc
                    };
                    self.inner
                        .store
                        .put(&id, fixed.downloaded_at, &fixed)
                        .await?;
                    state.docs.insert(id, fixed);
                    report.resized += 1;
                }
                Some(_) => {}
            }
        }

        let referenced: HashSet<PathBuf> = state
            .docs
            .values()
            .map(|doc| PathBuf::from(&doc.local_uri))
            .collect();

        for entry in self.inner.files.entries(Namespace::DocumentCache).await? {
            if !referenced.contains(&entry.path)
                && self
                    .inner
                    .files
                    .remove(Namespace::DocumentCache, &entry.path)
                    .await?
            {
                report.removed_files += 1;
            }
        }

        report.documents = state.docs.len();
        Ok(report)
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Downloads a document and records it, replacing any previous copy.
    ///
    /// ## Arguments
    /// * `document_id` - Id of the remote document record
    /// * `remote_url` - Absolute URL, or relative to the remote base URL
    /// * `file_name` - Display name; also the fallback for the MIME type
    /// * `declared_file_type` - Type from the remote record, authoritative
    ///   over whatever the transport reports
    /// * `on_progress` - Called as chunks arrive
    ///
    /// ## Errors
    /// Any failure leaves no record and no partial file behind.
    pub async fn download_document<P>(
        &self,
        document_id: &str,
        remote_url: &str,
        file_name: &str,
        declared_file_type: &str,
        on_progress: P,
    ) -> SyncResult<CachedDocument>
    where
        P: Fn(DownloadProgress) + Send + Sync,
    {
        if document_id.trim().is_empty() {
            return Err(CoreError::EmptyDocumentId.into());
        }

        let _staging = self.inner.staging.read().await;
        let mut writer = self
            .inner
            .files
            .create(Namespace::DocumentCache, file_name)
            .await?;

        let timeout = self.inner.settings.download_timeout();
        debug!(document_id = %document_id, url = %remote_url, "Downloading document");

        let result = tokio::time::timeout(
            timeout,
            self.inner
                .downloader
                .download(remote_url, &mut writer, &on_progress),
        )
        .await
        .unwrap_or_else(|_| Err(SyncError::Timeout(timeout.as_secs())));

        let meta = match result {
            Ok(meta) => meta,
            Err(err) => {
                warn!(document_id = %document_id, error = %err, "Document download failed");
                if let Err(e) = writer.discard().await {
                    warn!(error = %e, "Failed to discard partial download");
                }
                return Err(err);
            }
        };

        let mime_type = mime::derive(declared_file_type, file_name);
        if let Some(reported) = meta.content_type.as_deref() {
            if !reported.eq_ignore_ascii_case(&mime_type) {
                debug!(
                    document_id = %document_id,
                    reported,
                    derived = %mime_type,
                    "Ignoring transport content type"
                );
            }
        }

        let mut state = self.lock_loaded().await?;

        let final_path = self.inner.files.path_for(
            Namespace::DocumentCache,
            &format!("{}-{}-{}", document_id, unique_token(), file_name),
        );
        let blob = writer.commit(&final_path).await?;

        let doc = CachedDocument {
            document_id: document_id.to_string(),
            local_uri: blob.path.to_string_lossy().into_owned(),
            mime_type,
            file_size_bytes: blob.size_bytes,
            downloaded_at: Utc::now(),
        };

        if let Err(e) = self
            .inner
            .store
            .put(document_id, doc.downloaded_at, &doc)
            .await
        {
            self.release_file(&blob.path).await;
            return Err(e.into());
        }

        let previous = state.docs.insert(document_id.to_string(), doc.clone());
        if let Some(previous) = previous {
            let old_path = PathBuf::from(&previous.local_uri);
            if old_path != blob.path {
                self.release_file(&old_path).await;
            }
        }

        self.publish(&state);
        info!(
            document_id = %document_id,
            size_bytes = doc.file_size_bytes,
            mime_type = %doc.mime_type,
            "Document cached"
        );

        Ok(doc)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_cached_document(
        &self,
        document_id: &str,
    ) -> SyncResult<Option<CachedDocument>> {
        let state = self.lock_loaded().await?;
        Ok(state.docs.get(document_id).cloned())
    }

    /// Every cached document, oldest download first.
    pub async fn list_cached_documents(&self) -> SyncResult<Vec<CachedDocument>> {
        let state = self.lock_loaded().await?;
        Ok(sorted(&state.docs))
    }

    /// Sum of `file_size_bytes` over all records.
    pub async fn total_cache_size(&self) -> SyncResult<u64> {
        let state = self.lock_loaded().await?;
        Ok(total_bytes(&state.docs))
    }

    /// Total size, document count and the warning level the UI should show.
    pub async fn cache_usage(&self) -> SyncResult<CacheUsage> {
        let state = self.lock_loaded().await?;
        let total = total_bytes(&state.docs);
        Ok(CacheUsage {
            total_bytes: total,
            document_count: state.docs.len(),
            warning: CacheWarningLevel::for_size(
                total,
                self.inner.settings.soft_warning_bytes(),
                self.inner.settings.strong_warning_bytes(),
            ),
        })
    }

    /// Maps a cached file's `local_uri` to a URI a viewer can open.
    pub fn content_uri(&self, local_uri: &str) -> SyncResult<String> {
        let path = local_path(local_uri)?;
        self.inner.resolver.resolve(&path)
    }

    /// Current snapshot first, then one per mutation.
    pub async fn subscribe(&self) -> SyncResult<Subscription<CachedDocument>> {
        let state = self.lock_loaded().await?;
        Ok(self.inner.broadcaster.subscribe(Arc::new(sorted(&state.docs))))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Rewrites the MIME type of a cached document from its declared type.
    ///
    /// The file itself is untouched.
    pub async fn fix_mime_type(
        &self,
        document_id: &str,
        declared_file_type: &str,
    ) -> SyncResult<CachedDocument> {
        let mut state = self.lock_loaded().await?;

        let Some(existing) = state.docs.get(document_id) else {
            return Err(SyncError::not_found("cached document", document_id));
        };

        let file_name = Path::new(&existing.local_uri)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let fixed = CachedDocument {
            mime_type: mime::derive(declared_file_type, &file_name),
            ..existing.clone()
        };

        if fixed.mime_type == existing.mime_type {
            return Ok(fixed);
        }

        self.inner
            .store
            .put(document_id, fixed.downloaded_at, &fixed)
            .await?;
        info!(
            document_id = %document_id,
            from = %existing.mime_type,
            to = %fixed.mime_type,
            "Corrected MIME type"
        );
        state.docs.insert(document_id.to_string(), fixed.clone());

        self.publish(&state);
        Ok(fixed)
    }

    /// Removes a document's record and file. Idempotent.
    ///
    /// File removal is best-effort; a leftover is swept by the next `init()`.
    ///
    /// ## Returns
    /// `true` if a record existed.
    pub async fn delete_cached_document(&self, document_id: &str) -> SyncResult<bool> {
        let mut state = self.lock_loaded().await?;

        let Some(doc) = state.docs.get(document_id).cloned() else {
            return Ok(false);
        };

        self.inner.store.remove(document_id).await?;
        state.docs.remove(document_id);

        let path = PathBuf::from(&doc.local_uri);
        if self.inner.files.owns(Namespace::DocumentCache, &path) {
            self.release_file(&path).await;
        }

        self.publish(&state);
        info!(
            document_id = %document_id,
            size_bytes = doc.file_size_bytes,
            "Cached document deleted"
        );
        Ok(true)
    }

    /// Removes every cached document and file.
    ///
    /// ## Returns
    /// Number of records removed.
    pub async fn clear_all_cache(&self) -> SyncResult<usize> {
        let mut state = self.lock_loaded().await?;

        self.inner.store.clear().await?;
        let removed = state.docs.len();
        state.docs.clear();

        let files = match self.inner.files.clear(Namespace::DocumentCache).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to remove cached files");
                0
            }
        };

        self.publish(&state);
        info!(documents = removed, files, "Document cache cleared");
        Ok(removed)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn lock_loaded(&self) -> SyncResult<MutexGuard<'_, CacheState>> {
        let mut state = self.inner.state.lock().await;
        if !state.loaded {
            let docs: Vec<CachedDocument> = self.inner.store.list().await?;
            state.docs = docs
                .into_iter()
                .map(|doc| (doc.document_id.clone(), doc))
                .collect();
            state.loaded = true;
            debug!(count = state.docs.len(), "Document cache loaded");
        }
        Ok(state)
    }

    fn publish(&self, state: &CacheState) {
        self.inner.broadcaster.publish(Arc::new(sorted(&state.docs)));
    }

    /// Best-effort file removal; a leftover is swept by the next `init()`.
    async fn release_file(&self, path: &Path) {
        if let Err(e) = self.inner.files.remove(Namespace::DocumentCache, path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove cached file");
        }
    }
}

fn sorted(docs: &BTreeMap<String, CachedDocument>) -> Vec<CachedDocument> {
    let mut list: Vec<CachedDocument> = docs.values().cloned().collect();
    list.sort_by(|a, b| {
        a.downloaded_at
            .cmp(&b.downloaded_at)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    list
}

fn total_bytes(docs: &BTreeMap<String, CachedDocument>) -> u64 {
    docs.values().map(|doc| doc.file_size_bytes).sum()
}

/// Keeps a re-download from landing on the file it replaces.
fn unique_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// =============================================================================
// Tests
// =============================================================================
