//! # Data Queue
//!
//! Structured records (visits, sheets, expenses, attendance) created
//! offline, waiting to be created on the remote store.
//!
//! ## Processing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Data Queue Pass                                 │
//! │                                                                         │
//! │  items (createdAt ascending)                                            │
//! │                                                                         │
//! │   #1 visit    Pending ──► create_remote(visit, payload, id=#1)          │
//! │                              err  → Failed, attempt_count + 1           │
//! │   #2 expense  Pending ──► create_remote(expense, payload, id=#2)        │
//! │                              ok   → removed                             │
//! │   #3 visit    Pending    (held behind #1 until it is retried)           │
//! │                                                                         │
//! │  One create at a time. Records of one entity type reach the remote      │
//! │  store in enqueue order: a failed record holds back later records of    │
//! │  its own type only. The item id travels as the idempotency key so a     │
//! │  create repeated after a lost acknowledgement is deduplicated           │
//! │  remotely.                                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex as StdMutex};

use fieldsync_core::{DataQueueItem, EntityType, QueueCounts, QueueItem, QueueStatus};
use fieldsync_db::{Database, Namespace};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::broadcast::Subscription;
use crate::config::DataSettings;
use crate::error::{SyncError, SyncResult};
use crate::queue::{AttemptOutcome, ProcessSummary, QueueCore, RehydrationReport, WorkerHandle};
use crate::transport::RemoteWriter;

/// Offline record queue. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct DataQueue {
    inner: Arc<Inner>,
}

struct Inner {
    core: QueueCore<DataQueueItem>,
    writer: Arc<dyn RemoteWriter>,
    settings: DataSettings,
    /// Held for a whole pass so creates never overlap.
    pass: Mutex<()>,
    trigger: Arc<Notify>,
    worker: StdMutex<Option<WorkerHandle>>,
}

impl DataQueue {
    pub fn new(db: &Database, writer: Arc<dyn RemoteWriter>, settings: DataSettings) -> Self {
        DataQueue {
            inner: Arc::new(Inner {
                core: QueueCore::new(db.items(Namespace::DataQueue)),
                writer,
                settings,
                pass: Mutex::new(()),
                trigger: Arc::new(Notify::new()),
                worker: StdMutex::new(None),
            }),
        }
    }

    /// Loads persisted items (rehydrating interrupted ones) and starts the
    /// background worker. Later calls only re-trigger processing.
    pub async fn init(&self) -> SyncResult<RehydrationReport> {
        let report = self.inner.core.ensure_loaded().await?;

        let mut worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_none() {
            let queue = self.clone();
            *worker = Some(WorkerHandle::spawn(
                DataQueueItem::KIND,
                Arc::clone(&self.inner.trigger),
                move || {
                    let queue = queue.clone();
                    async move { queue.process_pending().await }
                },
            ));
            info!(
                loaded = report.loaded,
                rehydrated = report.rehydrated,
                "Data queue initialised"
            );
        }
        drop(worker);

        self.inner.trigger.notify_one();
        Ok(report)
    }

    /// Persists a new record as pending and returns its id.
    ///
    /// The record is committed locally when this returns, whatever the
    /// network state.
    pub async fn enqueue(&self, entity_type: EntityType, payload: Value) -> SyncResult<String> {
        let item = DataQueueItem::new(entity_type, payload)?;
        let id = item.id().to_string();

        self.inner.core.insert(item).await?;

        info!(id = %id, entity_type = %entity_type, "Record queued");
        self.inner.trigger.notify_one();
        Ok(id)
    }

    /// Snapshot ordered by `created_at` ascending.
    pub async fn queue(&self) -> SyncResult<Vec<DataQueueItem>> {
        self.inner.core.snapshot().await
    }

    pub async fn get(&self, id: &str) -> SyncResult<Option<DataQueueItem>> {
        self.inner.core.get(id).await
    }

    pub async fn counts(&self) -> SyncResult<QueueCounts> {
        self.inner.core.counts().await
    }

    /// Current snapshot first, then one per mutation.
    pub async fn subscribe(&self) -> SyncResult<Subscription<DataQueueItem>> {
        self.inner.core.subscribe().await
    }

    /// Moves one failed record back to pending.
    ///
    /// Returns `false` if the id is unknown or the record is not failed.
    pub async fn retry_item(&self, id: &str) -> SyncResult<bool> {
        let retried = self.inner.core.retry_where(|item| item.id() == id).await?;
        if retried.is_empty() {
            return Ok(false);
        }
        self.inner.trigger.notify_one();
        Ok(true)
    }

    /// Moves every failed record back to pending. Returns how many moved.
    ///
    /// `attempt_count` never makes a record ineligible.
    pub async fn retry_all_failed(&self) -> SyncResult<usize> {
        let retried = self.inner.core.retry_where(|_| true).await?;
        if !retried.is_empty() {
            info!(count = retried.len(), "Retrying failed records");
            self.inner.trigger.notify_one();
        }
        Ok(retried.len())
    }

    /// Deletes a record whatever its status. Idempotent.
    pub async fn remove_item(&self, id: &str) -> SyncResult<bool> {
        let removed = self.inner.core.remove(id).await?;
        if let Some(item) = &removed {
            info!(id = %id, entity_type = %item.entity_type, "Record removed from queue");
        }
        Ok(removed.is_some())
    }

    /// Attempts every pending record once, strictly one at a time.
    ///
    /// A record waits while an earlier record of the same entity type is
    /// failed or in flight.
    pub async fn process_pending(&self) -> SyncResult<ProcessSummary> {
        let _pass = self.inner.pass.lock().await;
        let mut summary = ProcessSummary::default();

        while let Some(item) = self.inner.core.claim_next_where(in_type_order).await? {
            summary.record(self.attempt(item).await);
        }

        Ok(summary)
    }

    /// Stops the background worker after the current pass.
    pub async fn shutdown(&self) {
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }

    async fn attempt(&self, item: DataQueueItem) -> AttemptOutcome {
        let id = item.id();
        let timeout = self.inner.settings.transfer_timeout();

        debug!(id = %id, entity_type = %item.entity_type, "Creating remote record");

        let result = tokio::time::timeout(
            timeout,
            self.inner
                .writer
                .create_remote(item.entity_type, &item.payload, id),
        )
        .await
        .unwrap_or_else(|_| Err(SyncError::Timeout(timeout.as_secs())));

        let recorded = match &result {
            Ok(()) => self.inner.core.complete(id).await,
            Err(err) => {
                warn!(
                    id = %id,
                    entity_type = %item.entity_type,
                    error = %err,
                    permanent = err.is_permanent(),
                    attempts = item.meta.attempt_count + 1,
                    "Remote create failed"
                );
                self.inner.core.fail(id, &err.to_string()).await
            }
        };

        match (result.is_ok(), recorded) {
            (true, Ok(true)) => {
                info!(id = %id, entity_type = %item.entity_type, "Record created remotely");
                AttemptOutcome::Succeeded
            }
            (false, Ok(true)) => AttemptOutcome::Failed,
            (_, Ok(false)) => AttemptOutcome::Skipped,
            (_, Err(e)) => {
                error!(id = %id, error = %e, "Failed to record attempt outcome");
                self.inner.core.release(id, &e.to_string()).await;
                AttemptOutcome::Failed
            }
        }
    }
}

fn in_type_order(item: &DataQueueItem, ahead: &[DataQueueItem]) -> bool {
    !ahead.iter().any(|earlier| {
        earlier.entity_type == item.entity_type && earlier.status() != QueueStatus::Pending
    })
}

// =============================================================================
// Tests
// =============================================================================
