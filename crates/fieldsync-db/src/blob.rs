//! # Local File Store
//!
//! Durable blob storage for staged uploads and cached documents.
//!
//! ## Layout
//! ```text
//! <root>/
//! ├── upload_queue/
//! │   ├── 7f3c…-photo.jpg           ← staged copy of a queued attachment
//! │   └── .photo.jpg-17180…-3.part  ← write in progress (never committed)
//! └── document_cache/
//!     └── doc-42-catalog.pdf        ← cached reference document
//! ```
//!
//! ## Staged Writes
//! Bytes are written to a hidden `.part` file next to the destination and
//! renamed into place by [`BlobWriter::commit`]. A crash or a failed
//! transfer therefore never leaves a file that looks complete. A writer
//! dropped without committing deletes its `.part` file.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::items::Namespace;

const PART_EXTENSION: &str = "part";
const MAX_FILE_NAME_LEN: usize = 120;

static PART_SEQ: AtomicU64 = AtomicU64::new(0);

/// A committed file and its size on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: PathBuf,
    pub size_bytes: u64,
}

// =============================================================================
// Local File Store
// =============================================================================

/// Namespace-partitioned blob directory.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileStore { root: root.into() }
    }

    /// Directory that holds every file of `namespace`.
    pub fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    /// Final location for a file named `file_name` in `namespace`.
    pub fn path_for(&self, namespace: Namespace, file_name: &str) -> PathBuf {
        self.namespace_dir(namespace).join(sanitize_file_name(file_name))
    }

    /// Returns true if `path` lies inside the partition of `namespace`.
    pub fn owns(&self, namespace: Namespace, path: &Path) -> bool {
        path.starts_with(self.namespace_dir(namespace))
    }

    /// Opens a staged writer whose commit target will be `file_name`.
    pub async fn create(&self, namespace: Namespace, file_name: &str) -> DbResult<BlobWriter> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DbError::io(&dir, e))?;

        let seq = PART_SEQ.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let temp_path = dir.join(format!(
            ".{}-{}-{}.{}",
            sanitize_file_name(file_name),
            nanos,
            seq,
            PART_EXTENSION
        ));

        let file = File::create(&temp_path)
            .await
            .map_err(|e| DbError::io(&temp_path, e))?;

        debug!(path = %temp_path.display(), "Opened staged blob");

        Ok(BlobWriter {
            file: Some(file),
            temp_path,
            committed: false,
        })
    }

    /// Copies an external file into `namespace` under `file_name`.
    ///
    /// ## Errors
    /// [`DbError::FileNotFound`] if `source` does not exist.
    pub async fn import(
        &self,
        namespace: Namespace,
        source: &Path,
        file_name: &str,
    ) -> DbResult<StoredBlob> {
        let mut input = File::open(source)
            .await
            .map_err(|e| DbError::io(source, e))?;

        let mut writer = self.create(namespace, file_name).await?;
        let temp_path = writer.temp_path().to_path_buf();
        tokio::io::copy(&mut input, &mut writer)
            .await
            .map_err(|e| DbError::io(&temp_path, e))?;

        writer.commit(&self.path_for(namespace, file_name)).await
    }

    /// Every file currently in `namespace`, including stale `.part` files.
    pub async fn entries(&self, namespace: Namespace) -> DbResult<Vec<StoredBlob>> {
        let dir = self.namespace_dir(namespace);
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DbError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| DbError::io(&dir, e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| DbError::io(entry.path(), e))?;
            if metadata.is_file() {
                entries.push(StoredBlob {
                    path: entry.path(),
                    size_bytes: metadata.len(),
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Size of a file on disk, or `None` if it does not exist.
    pub async fn size_of(&self, path: &Path) -> DbResult<Option<u64>> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DbError::io(path, e)),
        }
    }

    /// Deletes a file of `namespace`. Idempotent.
    ///
    /// ## Returns
    /// `true` if a file was removed.
    ///
    /// ## Errors
    /// Refuses paths outside the namespace partition.
    pub async fn remove(&self, namespace: Namespace, path: &Path) -> DbResult<bool> {
        if !self.owns(namespace, path) {
            return Err(DbError::Internal(format!(
                "{} is outside the {} partition",
                path.display(),
                namespace
            )));
        }

        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed blob");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DbError::io(path, e)),
        }
    }

    /// Deletes every file of `namespace`.
    ///
    /// ## Returns
    /// Number of removed files.
    pub async fn clear(&self, namespace: Namespace) -> DbResult<usize> {
        let mut removed = 0;
        for entry in self.entries(namespace).await? {
            if self.remove(namespace, &entry.path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Reduces an arbitrary name to a safe single path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Leading dots are stripped so a name can never collide with staging files.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    let mut result = if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    };

    if result.len() > MAX_FILE_NAME_LEN {
        // Keep the extension, it drives MIME fallback and viewer choice.
        let ext = Path::new(&result)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let keep = MAX_FILE_NAME_LEN.saturating_sub(ext.len());
        result = format!("{}{}", &result[..keep], ext);
    }

    result
}

// =============================================================================
// Blob Writer
// =============================================================================

/// Streaming writer into a hidden `.part` file.
///
/// Implements [`AsyncWrite`], so transports can stream straight into it.
#[derive(Debug)]
pub struct BlobWriter {
    file: Option<File>,
    temp_path: PathBuf,
    committed: bool,
}

impl BlobWriter {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flushes, syncs and renames the staged file to `final_path`,
    /// replacing any file already there.
    pub async fn commit(mut self, final_path: &Path) -> DbResult<StoredBlob> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| DbError::io(&self.temp_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| DbError::io(&self.temp_path, e))?;
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DbError::io(parent, e))?;
        }

        fs::rename(&self.temp_path, final_path)
            .await
            .map_err(|e| DbError::io(final_path, e))?;
        self.committed = true;

        let size_bytes = fs::metadata(final_path)
            .await
            .map_err(|e| DbError::io(final_path, e))?
            .len();

        debug!(path = %final_path.display(), size_bytes, "Committed blob");

        Ok(StoredBlob {
            path: final_path.to_path_buf(),
            size_bytes,
        })
    }

    /// Drops the staged bytes.
    pub async fn discard(mut self) -> DbResult<()> {
        self.file.take();
        self.committed = true;

        match fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::io(&self.temp_path, e)),
        }
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "blob writer already closed"))
    }
}

impl AsyncWrite for BlobWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.file_mut() {
            Ok(file) => Pin::new(file).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file_mut() {
            Ok(file) => Pin::new(file).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file_mut() {
            Ok(file) => Pin::new(file).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.temp_path.display(), error = %e, "Failed to remove staged blob");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn store() -> (LocalFileStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalFileStore::new(dir.path().join("files")), dir)
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("catalog 2024.pdf"), "catalog_2024.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\photos\\img.jpg"), "img.jpg");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(""), "file");

        let long = format!("{}.pdf", "a".repeat(300));
        let cleaned = sanitize_file_name(&long);
        assert_eq!(cleaned.len(), MAX_FILE_NAME_LEN);
        assert!(cleaned.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn test_commit_moves_staged_file() {
        let (store, _dir) = store();
        let mut writer = store.create(Namespace::DocumentCache, "doc.pdf").await.unwrap();
        let temp = writer.temp_path().to_path_buf();
        assert_eq!(temp.extension().and_then(|ext| ext.to_str()), Some(PART_EXTENSION));

        writer.write_all(b"hello world").await.unwrap();

        let target = store.path_for(Namespace::DocumentCache, "doc.pdf");
        let blob = writer.commit(&target).await.unwrap();

        assert_eq!(blob.size_bytes, 11);
        assert!(target.exists());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_dropped_writer_leaves_nothing() {
        let (store, _dir) = store();
        let mut writer = store.create(Namespace::DocumentCache, "doc.pdf").await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        let temp = writer.temp_path().to_path_buf();

        drop(writer);
        assert!(!temp.exists());
        assert!(store.entries(Namespace::DocumentCache).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_removes_part_file() {
        let (store, _dir) = store();
        let writer = store.create(Namespace::UploadQueue, "a.jpg").await.unwrap();
        let temp = writer.temp_path().to_path_buf();

        writer.discard().await.unwrap();
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_import_copies_source() {
        let (store, dir) = store();
        let source = dir.path().join("camera.jpg");
        std::fs::write(&source, vec![7u8; 2048]).unwrap();

        let blob = store
            .import(Namespace::UploadQueue, &source, "id-camera.jpg")
            .await
            .unwrap();

        assert_eq!(blob.size_bytes, 2048);
        assert!(store.owns(Namespace::UploadQueue, &blob.path));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_import_missing_source() {
        let (store, dir) = store();
        let err = store
            .import(Namespace::UploadQueue, &dir.path().join("gone.jpg"), "gone.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_partitioned() {
        let (store, _dir) = store();
        let mut writer = store.create(Namespace::DocumentCache, "x.pdf").await.unwrap();
        writer.write_all(b"x").await.unwrap();
        let path = writer
            .commit(&store.path_for(Namespace::DocumentCache, "x.pdf"))
            .await
            .unwrap()
            .path;

        assert!(store.remove(Namespace::UploadQueue, &path).await.is_err());
        assert!(store.remove(Namespace::DocumentCache, &path).await.unwrap());
        assert!(!store.remove(Namespace::DocumentCache, &path).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_namespace() {
        let (store, _dir) = store();
        for name in ["a.pdf", "b.pdf"] {
            let mut writer = store.create(Namespace::DocumentCache, name).await.unwrap();
            writer.write_all(b"data").await.unwrap();
            writer
                .commit(&store.path_for(Namespace::DocumentCache, name))
                .await
                .unwrap();
        }

        assert_eq!(store.entries(Namespace::DocumentCache).await.unwrap().len(), 2);
        assert_eq!(store.clear(Namespace::DocumentCache).await.unwrap(), 2);
        assert!(store.entries(Namespace::DocumentCache).await.unwrap().is_empty());
        assert!(store.entries(Namespace::UploadQueue).await.unwrap().is_empty());
    }
}
