//! # Remote Collaborators
//!
//! Capabilities the queues and the cache consume but do not implement.
//!
//! ```text
//! ┌──────────────┐   upload(path, target)        ┌──────────────────────┐
//! │ UploadQueue  │ ─────────────────────────────►│  UploadTransport     │
//! └──────────────┘                               └──────────────────────┘
//! ┌──────────────┐   create_remote(type, data)   ┌──────────────────────┐
//! │ DataQueue    │ ─────────────────────────────►│  RemoteWriter        │
//! └──────────────┘                               └──────────────────────┘
//! ┌──────────────┐   download(url, sink, prog)   ┌──────────────────────┐
//! │DocumentCache │ ─────────────────────────────►│  DocumentDownloader  │
//! │              │   resolve(path)               ├──────────────────────┤
//! │              │ ─────────────────────────────►│  ContentUriResolver  │
//! └──────────────┘                               └──────────────────────┘
//! ```
//!
//! [`crate::http::HttpRemoteStore`] implements the three network traits.
//! Tests inject scripted fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fieldsync_core::{EntityType, RemoteTarget};
use serde_json::Value;
use tokio::io::AsyncWrite;
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Network Capabilities
// =============================================================================

/// Binary upload to the remote store.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Uploads the file at `local_path` to `target`.
    async fn upload(&self, local_path: &Path, target: &RemoteTarget) -> SyncResult<()>;
}

/// Structured record creation on the remote store.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    /// Creates one record.
    ///
    /// ## Arguments
    /// * `client_id` - The queue item id. The remote store deduplicates on it,
    ///   so a create repeated after a lost acknowledgement is harmless.
    async fn create_remote(
        &self,
        entity_type: EntityType,
        payload: &Value,
        client_id: &str,
    ) -> SyncResult<()>;
}

/// Progress of a running download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    /// Unknown when the server sends no length.
    pub total_bytes: Option<u64>,
}

/// What a finished download reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMeta {
    pub bytes_written: u64,
    /// Content type claimed by the transport. Informational only.
    pub content_type: Option<String>,
}

/// Streaming download of a remote document.
#[async_trait]
pub trait DocumentDownloader: Send + Sync {
    /// Streams `url` into `sink`, reporting progress as chunks arrive.
    async fn download(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> SyncResult<DownloadMeta>;
}

// =============================================================================
// Content URI Resolution
// =============================================================================

/// Maps an internal file path to something a platform viewer can open.
pub trait ContentUriResolver: Send + Sync {
    fn resolve(&self, local_path: &Path) -> SyncResult<String>;
}

/// Resolves to `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileUriResolver;

impl ContentUriResolver for FileUriResolver {
    fn resolve(&self, local_path: &Path) -> SyncResult<String> {
        Url::from_file_path(local_path)
            .map(|url| url.to_string())
            .map_err(|_| {
                SyncError::InvalidUrl(format!(
                    "{} is not an absolute path",
                    local_path.display()
                ))
            })
    }
}

/// Accepts either a plain path or a `file://` URL.
pub fn local_path(uri: &str) -> SyncResult<PathBuf> {
    if uri.starts_with("file:") {
        let url = Url::parse(uri)?;
        return url
            .to_file_path()
            .map_err(|_| SyncError::InvalidUrl(format!("not a local file URL: {}", uri)));
    }
    Ok(PathBuf::from(uri))
}

// =============================================================================
// Collaborator Bundle
// =============================================================================

/// Everything the three services need from the outside world.
#[derive(Clone)]
pub struct RemoteStore {
    pub uploads: Arc<dyn UploadTransport>,
    pub writer: Arc<dyn RemoteWriter>,
    pub downloader: Arc<dyn DocumentDownloader>,
    pub resolver: Arc<dyn ContentUriResolver>,
}

impl RemoteStore {
    /// Uses one value for all three network capabilities and `file://` URIs.
    pub fn from_single<S>(store: Arc<S>) -> Self
    where
        S: UploadTransport + RemoteWriter + DocumentDownloader + 'static,
    {
        RemoteStore {
            uploads: store.clone(),
            writer: store.clone(),
            downloader: store,
            resolver: Arc::new(FileUriResolver),
        }
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore").finish_non_exhaustive()
    }
}
