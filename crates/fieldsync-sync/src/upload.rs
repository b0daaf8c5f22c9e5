//! # Upload Queue
//!
//! Guarantees that every locally captured attachment eventually reaches the
//! remote store.
//!
//! ## Upload Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Upload Queue Flow                               │
//! │                                                                         │
//! │  enqueue(source, target)                                               │
//! │    1. copy source → files/upload_queue/<id>-<name>   (staged blob)     │
//! │    2. persist item as Pending                                          │
//! │    3. trigger the worker, return the id                                │
//! │                                                                         │
//! │  worker pass (up to `concurrency` transfers at once)                   │
//! │    claim oldest Pending ──► InProgress                                 │
//! │         │                                                               │
//! │         ├── upload ok      ──► item removed, staged blob deleted       │
//! │         ├── upload error   ──► Failed (attempt_count + 1, last_error)  │
//! │         └── timeout        ──► Failed                                  │
//! │                                                                         │
//! │  No automatic retry: retry_failed / retry_item are explicit calls.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Staging a copy means the picker's temp file can disappear without losing
//! the attachment.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use fieldsync_core::{QueueCounts, QueueItem, RemoteTarget, UploadQueueItem};
use fieldsync_db::{Database, LocalFileStore, Namespace};
use tokio::sync::{Notify, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broadcast::Subscription;
use crate::config::UploadSettings;
use crate::error::{SyncError, SyncResult};
use crate::queue::{AttemptOutcome, ProcessSummary, QueueCore, RehydrationReport, WorkerHandle};
use crate::transport::{local_path, UploadTransport};

/// Attachment upload queue. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

struct Inner {
    core: QueueCore<UploadQueueItem>,
    files: LocalFileStore,
    transport: Arc<dyn UploadTransport>,
    settings: UploadSettings,
    permits: Arc<Semaphore>,
    /// Shared while `enqueue` has a staged blob not yet in the queue;
    /// exclusive for the orphan sweep.
    staging: RwLock<()>,
    trigger: Arc<Notify>,
    worker: StdMutex<Option<WorkerHandle>>,
}

impl UploadQueue {
    /// Creates the queue. Nothing runs until [`UploadQueue::init`].
    pub fn new(
        db: &Database,
        files: LocalFileStore,
        transport: Arc<dyn UploadTransport>,
        settings: UploadSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));

        UploadQueue {
            inner: Arc::new(Inner {
                core: QueueCore::new(db.items(Namespace::UploadQueue)),
                files,
                transport,
                settings,
                permits,
                staging: RwLock::new(()),
                trigger: Arc::new(Notify::new()),
                worker: StdMutex::new(None),
            }),
        }
    }

    /// Loads persisted items, sweeps orphaned staged blobs and starts the
    /// background worker. Safe to call more than once.
    pub async fn init(&self) -> SyncResult<RehydrationReport> {
        let report = self.inner.core.ensure_loaded().await?;

        let started = {
            let mut worker = self.lock_worker();
            if worker.is_none() {
                let queue = self.clone();
                *worker = Some(WorkerHandle::spawn(
                    UploadQueueItem::KIND,
                    Arc::clone(&self.inner.trigger),
                    move || {
                        let queue = queue.clone();
                        async move { queue.process_pending().await }
                    },
                ));
                true
            } else {
                false
            }
        };

        if started {
            self.sweep_orphans().await?;
            info!(
                loaded = report.loaded,
                rehydrated = report.rehydrated,
                "Upload queue initialised"
            );
        }

        self.inner.trigger.notify_one();
        Ok(report)
    }

    /// Queues `source_uri` for upload to `target` and returns the item id.
    ///
    /// ## Errors
    /// - `InvalidInput` for an empty source or incomplete target
    /// - `LocalStorage` if the source cannot be read or staged
    pub async fn enqueue(
        &self,
        source_uri: impl Into<String>,
        target: RemoteTarget,
    ) -> SyncResult<String> {
        let mut item = UploadQueueItem::new(source_uri, target)?;
        let source = local_path(&item.source_uri)?;

        let staged_name = format!("{}-{}", item.id(), file_name_of(&source));
        let _staging = self.inner.staging.read().await;
        let blob = self
            .inner
            .files
            .import(Namespace::UploadQueue, &source, &staged_name)
            .await?;
        item.local_uri = blob.path.to_string_lossy().into_owned();

        let id = item.id().to_string();
        if let Err(e) = self.inner.core.insert(item).await {
            self.release_blob(&blob.path).await;
            return Err(e);
        }

        info!(
            id = %id,
            size_bytes = blob.size_bytes,
            "Attachment queued for upload"
        );
        self.inner.trigger.notify_one();
        Ok(id)
    }

    /// Snapshot ordered by `created_at` ascending.
    pub async fn queue(&self) -> SyncResult<Vec<UploadQueueItem>> {
        self.inner.core.snapshot().await
    }

    pub async fn get(&self, id: &str) -> SyncResult<Option<UploadQueueItem>> {
        self.inner.core.get(id).await
    }

    pub async fn counts(&self) -> SyncResult<QueueCounts> {
        self.inner.core.counts().await
    }

    /// Current snapshot first, then one per mutation.
    pub async fn subscribe(&self) -> SyncResult<Subscription<UploadQueueItem>> {
        self.inner.core.subscribe().await
    }

    /// Moves every failed upload back to pending. Returns how many moved.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let retried = self.inner.core.retry_where(|_| true).await?;
        if !retried.is_empty() {
            info!(count = retried.len(), "Retrying failed uploads");
            self.inner.trigger.notify_one();
        }
        Ok(retried.len())
    }

    /// Moves one failed upload back to pending.
    ///
    /// Returns `false` if the id is unknown or the item is not failed.
    pub async fn retry_item(&self, id: &str) -> SyncResult<bool> {
        let retried = self.inner.core.retry_where(|item| item.id() == id).await?;
        if retried.is_empty() {
            debug!(id = %id, "Nothing to retry");
            return Ok(false);
        }
        self.inner.trigger.notify_one();
        Ok(true)
    }

    /// Drops an upload whatever its status, including its staged blob.
    ///
    /// Safe while the upload is in flight: the attempt's outcome is ignored.
    pub async fn remove_from_queue(&self, id: &str) -> SyncResult<bool> {
        let Some(removed) = self.inner.core.remove(id).await? else {
            return Ok(false);
        };
        self.release_blob(Path::new(&removed.local_uri)).await;
        info!(id = %id, "Upload removed from queue");
        Ok(true)
    }

    /// Attempts every pending upload once, `concurrency` at a time.
    ///
    /// ## Errors
    /// Returned only after every upload already started has finished.
    pub async fn process_pending(&self) -> SyncResult<ProcessSummary> {
        let mut summary = ProcessSummary::default();
        let mut attempts = JoinSet::new();

        let stopped = loop {
            let permit = match Arc::clone(&self.inner.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break Some(SyncError::ShuttingDown),
            };

            let item = match self.inner.core.claim_next().await {
                Ok(Some(item)) => item,
                Ok(None) => break None,
                Err(e) => break Some(e),
            };

            let queue = self.clone();
            attempts.spawn(async move {
                let outcome = queue.attempt(item).await;
                drop(permit);
                outcome
            });

            // Collect whatever already finished so the set stays small.
            while let Some(done) = attempts.try_join_next() {
                record(&mut summary, done);
            }
        };

        while let Some(done) = attempts.join_next().await {
            record(&mut summary, done);
        }

        match stopped {
            Some(e) => {
                error!(error = %e, finished = summary.attempted(), "Upload pass aborted");
                Err(e)
            }
            None => Ok(summary),
        }
    }

    /// Stops the background worker. In-flight uploads finish normally.
    pub async fn shutdown(&self) {
        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn attempt(&self, item: UploadQueueItem) -> AttemptOutcome {
        let id = item.id().to_string();
        let timeout = self.inner.settings.transfer_timeout();

        debug!(id = %id, target = %item.remote_target, "Uploading attachment");

        let result = match tokio::time::timeout(
            timeout,
            self.inner
                .transport
                .upload(Path::new(&item.local_uri), &item.remote_target),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout.as_secs())),
        };

        match result {
            Ok(()) => match self.inner.core.complete(&id).await {
                Ok(true) => {
                    self.release_blob(Path::new(&item.local_uri)).await;
                    info!(id = %id, target = %item.remote_target, "Upload confirmed");
                    AttemptOutcome::Succeeded
                }
                Ok(false) => AttemptOutcome::Skipped,
                Err(e) => {
                    error!(id = %id, error = %e, "Failed to record confirmed upload");
                    self.inner.core.release(&id, &e.to_string()).await;
                    AttemptOutcome::Failed
                }
            },
            Err(err) => {
                warn!(
                    id = %id,
                    error = %err,
                    retryable = err.is_retryable(),
                    attempts = item.meta.attempt_count + 1,
                    "Upload failed"
                );
                match self.inner.core.fail(&id, &err.to_string()).await {
                    Ok(true) => AttemptOutcome::Failed,
                    Ok(false) => AttemptOutcome::Skipped,
                    Err(e) => {
                        error!(id = %id, error = %e, "Failed to record upload failure");
                        self.inner.core.release(&id, &err.to_string()).await;
                        AttemptOutcome::Failed
                    }
                }
            }
        }
    }

    /// Deletes staged blobs that no queue item references.
    async fn sweep_orphans(&self) -> SyncResult<usize> {
        let _staging = self.inner.staging.write().await;
        let referenced: Vec<PathBuf> = self
            .inner
            .core
            .snapshot()
            .await?
            .into_iter()
            .map(|item| PathBuf::from(item.local_uri))
            .collect();

        let mut removed = 0;
        for entry in self.inner.files.entries(Namespace::UploadQueue).await? {
            if !referenced.contains(&entry.path)
                && self
                    .inner
                    .files
                    .remove(Namespace::UploadQueue, &entry.path)
                    .await?
            {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, "Removed orphaned staged uploads");
        }
        Ok(removed)
    }

    async fn release_blob(&self, path: &Path) {
        if let Err(e) = self.inner.files.remove(Namespace::UploadQueue, path).await {
            warn!(path = %path.display(), error = %e, "Failed to delete staged upload");
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<WorkerHandle>> {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn record(
    summary: &mut ProcessSummary,
    done: Result<AttemptOutcome, tokio::task::JoinError>,
) {
    match done {
        Ok(outcome) => summary.record(outcome),
        Err(e) => {
            error!(error = %e, "Upload task panicked");
            summary.failed += 1;
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fieldsync_core::QueueStatus;
    use fieldsync_db::DbConfig;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays scripted outcomes; succeeds once the script runs out.
    #[derive(Default)]
    struct ScriptedTransport {
        script: StdMutex<VecDeque<SyncResult<()>>>,
        uploaded: StdMutex<Vec<(PathBuf, RemoteTarget)>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn failing(times: usize) -> Self {
            let script = (0..times)
                .map(|_| Err(SyncError::TransientTransport("network unreachable".into())))
                .collect();
            ScriptedTransport {
                script: StdMutex::new(script),
                ..Default::default()
            }
        }

        fn uploads(&self) -> usize {
            self.uploaded.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn upload(&self, local_path: &Path, target: &RemoteTarget) -> SyncResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Err(e)) => Err(e),
                _ => {
                    self.uploaded
                        .lock()
                        .unwrap()
                        .push((local_path.to_path_buf(), target.clone()));
                    Ok(())
                }
            }
        }
    }

    struct Fixture {
        queue: UploadQueue,
        transport: Arc<ScriptedTransport>,
        files: LocalFileStore,
        dir: tempfile::TempDir,
    }

    async fn fixture(transport: ScriptedTransport, settings: UploadSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let files = LocalFileStore::new(dir.path().join("files"));
        let transport = Arc::new(transport);
        let queue = UploadQueue::new(&db, files.clone(), transport.clone(), settings);
        Fixture {
            queue,
            transport,
            files,
            dir,
        }
    }

    fn photo(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0xFFu8; 4096]).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn target() -> RemoteTarget {
        RemoteTarget::new("visits", "v-123", "photo")
    }

    #[tokio::test]
    async fn test_enqueue_stages_copy_and_is_pending() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let source = photo(&fx.dir, "photo.jpg");

        let first = fx.queue.enqueue(source.clone(), target()).await.unwrap();
        let second = fx.queue.enqueue(source.clone(), target()).await.unwrap();
        assert_ne!(first, second);

        let queue = fx.queue.queue().await.unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|item| item.status() == QueueStatus::Pending));

        let item = &queue[0];
        assert_eq!(item.source_uri, source);
        assert_ne!(item.local_uri, source);
        assert!(fx.files.owns(Namespace::UploadQueue, Path::new(&item.local_uri)));
        assert!(Path::new(&item.local_uri).exists());
    }

    #[tokio::test]
    async fn test_enqueue_missing_source_is_local_storage_error() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let missing = fx.dir.path().join("gone.jpg");

        let err = fx
            .queue
            .enqueue(missing.to_string_lossy(), target())
            .await
            .unwrap_err();
        assert!(err.is_local_storage());
        assert!(fx.queue.queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_incomplete_target() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let source = photo(&fx.dir, "photo.jpg");

        let err = fx
            .queue
            .enqueue(source, RemoteTarget::new("visits", "", "photo"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_success_removes_item_and_blob() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let id = fx.queue.enqueue(photo(&fx.dir, "photo.jpg"), target()).await.unwrap();
        let staged = fx.queue.get(&id).await.unwrap().unwrap().local_uri;
        assert!(Path::new(&staged).exists());

        let summary = fx.queue.process_pending().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(fx.queue.queue().await.unwrap().is_empty());
        assert!(!Path::new(&staged).exists());
        assert_eq!(fx.transport.uploads(), 1);
    }

    #[tokio::test]
    async fn test_fail_twice_retry_then_succeed() {
        let fx = fixture(ScriptedTransport::failing(2), UploadSettings::default()).await;
        let id = fx.queue.enqueue(photo(&fx.dir, "photo.jpg"), target()).await.unwrap();

        let summary = fx.queue.process_pending().await.unwrap();
        assert_eq!(summary.failed, 1);
        let item = fx.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status(), QueueStatus::Failed);
        assert_eq!(item.meta.attempt_count, 1);

        // Failed items are not retried automatically.
        assert_eq!(fx.queue.process_pending().await.unwrap().attempted(), 0);

        assert!(fx.queue.retry_item(&id).await.unwrap());
        fx.queue.process_pending().await.unwrap();
        let item = fx.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status(), QueueStatus::Failed);
        assert_eq!(item.meta.attempt_count, 2);
        assert!(item.meta.last_error.unwrap().contains("network unreachable"));

        assert!(fx.queue.retry_item(&id).await.unwrap());
        assert_eq!(
            fx.queue.get(&id).await.unwrap().unwrap().status(),
            QueueStatus::Pending
        );

        let summary = fx.queue.process_pending().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(fx.queue.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_item_unknown_or_pending_is_noop() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let id = fx.queue.enqueue(photo(&fx.dir, "photo.jpg"), target()).await.unwrap();

        assert!(!fx.queue.retry_item("no-such-id").await.unwrap());
        assert!(!fx.queue.retry_item(&id).await.unwrap());
        assert_eq!(fx.queue.retry_failed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let transport = ScriptedTransport {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let settings = UploadSettings {
            concurrency: 1,
            transfer_timeout_secs: 1,
        };
        let fx = fixture(transport, settings).await;
        let id = fx.queue.enqueue(photo(&fx.dir, "photo.jpg"), target()).await.unwrap();

        let summary = fx.queue.process_pending().await.unwrap();
        assert_eq!(summary.failed, 1);

        let item = fx.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status(), QueueStatus::Failed);
        assert!(item.meta.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_remove_during_upload_is_safe() {
        let transport = ScriptedTransport {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let fx = fixture(transport, UploadSettings::default()).await;
        let id = fx.queue.enqueue(photo(&fx.dir, "photo.jpg"), target()).await.unwrap();

        let queue = fx.queue.clone();
        let pass = tokio::spawn(async move { queue.process_pending().await });

        // Wait for the attempt to claim the item.
        loop {
            let item = fx.queue.get(&id).await.unwrap().unwrap();
            if item.status() == QueueStatus::InProgress {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(fx.queue.remove_from_queue(&id).await.unwrap());
        assert!(!fx.queue.remove_from_queue(&id).await.unwrap());

        let summary = pass.await.unwrap().unwrap();
        assert_eq!(summary.succeeded, 0);
        assert!(fx.queue.queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_processes_after_init() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let mut sub = fx.queue.subscribe().await.unwrap();
        assert!(sub.recv().await.unwrap().is_empty());

        fx.queue.init().await.unwrap();
        fx.queue.enqueue(photo(&fx.dir, "photo.jpg"), target()).await.unwrap();

        // Snapshots: added, in progress, removed.
        let mut last_len = 1;
        while last_len != 0 {
            let snapshot = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap()
                .unwrap();
            last_len = snapshot.len();
        }

        assert_eq!(fx.transport.uploads(), 1);
        fx.queue.shutdown().await;
        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_sweeps_orphaned_blobs() {
        let fx = fixture(ScriptedTransport::default(), UploadSettings::default()).await;
        let source = photo(&fx.dir, "stray.jpg");
        let orphan = fx
            .files
            .import(Namespace::UploadQueue, Path::new(&source), "stray.jpg")
            .await
            .unwrap();

        fx.queue.init().await.unwrap();
        assert!(!orphan.path.exists());
        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_waits_for_staging_enqueue() {
        // Uploads keep failing so the staged blob stays referenced.
        let fx = fixture(ScriptedTransport::failing(5), UploadSettings::default()).await;
        let source = photo(&fx.dir, "photo.jpg");

        // An enqueue that has staged its blob but not yet queued the item.
        let staging = fx.queue.inner.staging.read().await;
        let mut item = UploadQueueItem::new(source.clone(), target()).unwrap();
        let blob = fx
            .files
            .import(Namespace::UploadQueue, Path::new(&source), "staged.jpg")
            .await
            .unwrap();
        item.local_uri = blob.path.to_string_lossy().into_owned();

        let queue = fx.queue.clone();
        let init = tokio::spawn(async move { queue.init().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!init.is_finished());
        assert!(blob.path.exists());

        fx.queue.inner.core.insert(item).await.unwrap();
        drop(staging);

        init.await.unwrap().unwrap();
        assert!(blob.path.exists());
        fx.queue.shutdown().await;
    }

    /// Closes the database from inside an upload; `slow` targets take longer.
    struct ClosingTransport {
        db: Database,
        finished: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl UploadTransport for ClosingTransport {
        async fn upload(&self, _: &Path, target: &RemoteTarget) -> SyncResult<()> {
            if target.field == "slow" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            } else {
                self.db.close().await;
            }
            self.finished.lock().unwrap().push(target.field.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_storage_error_drains_in_flight_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let transport = Arc::new(ClosingTransport {
            db: db.clone(),
            finished: StdMutex::new(Vec::new()),
        });
        let settings = UploadSettings {
            concurrency: 2,
            ..Default::default()
        };
        let queue = UploadQueue::new(
            &db,
            LocalFileStore::new(dir.path().join("files")),
            transport.clone(),
            settings,
        );

        let mut ids = Vec::new();
        for field in ["slow", "fast", "later"] {
            let target = RemoteTarget::new("visits", "v-123", field);
            ids.push(queue.enqueue(photo(&dir, &format!("{field}.jpg")), target).await.unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Claiming the third item hits the closed store.
        assert!(queue.process_pending().await.is_err());

        // The slow upload was allowed to finish rather than being aborted.
        let finished = transport.finished.lock().unwrap().clone();
        assert!(finished.contains(&"slow".to_string()));

        // Neither upload is stranded in progress.
        for id in &ids[..2] {
            let item = queue.get(id).await.unwrap().unwrap();
            assert_eq!(item.status(), QueueStatus::Failed);
            assert!(item.meta.last_error.is_some());
        }
        assert_eq!(queue.counts().await.unwrap().in_progress, 0);
        assert_eq!(
            queue.get(&ids[2]).await.unwrap().unwrap().status(),
            QueueStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let transport = ScriptedTransport {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let settings = UploadSettings {
            concurrency: 2,
            ..Default::default()
        };
        let fx = fixture(transport, settings).await;
        for i in 0..5 {
            fx.queue
                .enqueue(photo(&fx.dir, &format!("p{}.jpg", i)), target())
                .await
                .unwrap();
        }

        let queue = fx.queue.clone();
        let pass = tokio::spawn(async move { queue.process_pending().await });

        let mut max_in_flight = 0;
        while !pass.is_finished() {
            let counts = fx.queue.counts().await.unwrap();
            max_in_flight = max_in_flight.max(counts.in_progress);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(pass.await.unwrap().unwrap().succeeded, 5);
        assert!(max_in_flight <= 2);
        assert_eq!(fx.transport.uploads(), 5);
    }
}
