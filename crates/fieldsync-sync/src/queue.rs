//! # Queue Engine
//!
//! Durable, observable queue shared by the upload queue and the data queue.
//!
//! ## Write Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  One Mutation (under the queue lock)                    │
//! │                                                                         │
//! │  1. compute the new item state on a copy                               │
//! │  2. write it to the ItemStore          ── fails? → nothing changed     │
//! │  3. swap it into the in-memory list                                    │
//! │  4. publish a snapshot to subscribers                                  │
//! │                                                                         │
//! │  A subscriber therefore never sees a state that a restart at that      │
//! │  instant would not reload.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rehydration
//! Loading is explicit ([`QueueCore::ensure_loaded`]) and rewrites every
//! persisted `InProgress` item to `Pending` before anything else can read
//! the queue. An item interrupted by a crash is therefore retried, never
//! stranded.

use std::future::Future;
use std::sync::Arc;

use fieldsync_core::{QueueCounts, QueueItem, QueueStatus};
use fieldsync_db::ItemStore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::{StatusBroadcaster, Subscription};
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Reports
// =============================================================================

/// Outcome of loading a queue from the item store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RehydrationReport {
    /// Items in the queue after loading.
    pub loaded: usize,
    /// Items that were found `InProgress` and reset to `Pending`.
    pub rehydrated: usize,
}

/// Outcome of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Attempts whose item was removed while the transfer was running.
    pub skipped: usize,
}

impl ProcessSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub(crate) fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Succeeded => self.succeeded += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Succeeded,
    Failed,
    Skipped,
}

// =============================================================================
// Queue Core
// =============================================================================

struct QueueState<T> {
    /// Sorted by `(created_at, id)`.
    items: Vec<T>,
    loaded: bool,
}

/// In-memory list + item store partition + broadcaster for one queue.
pub struct QueueCore<T: QueueItem> {
    store: ItemStore,
    state: Mutex<QueueState<T>>,
    broadcaster: StatusBroadcaster<T>,
}

impl<T: QueueItem> QueueCore<T> {
    pub fn new(store: ItemStore) -> Self {
        QueueCore {
            store,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                loaded: false,
            }),
            broadcaster: StatusBroadcaster::new(),
        }
    }

    /// Loads the queue once, rehydrating interrupted items.
    ///
    /// Later calls return the current size and `rehydrated: 0`.
    pub async fn ensure_loaded(&self) -> SyncResult<RehydrationReport> {
        let mut state = self.state.lock().await;
        if state.loaded {
            return Ok(RehydrationReport {
                loaded: state.items.len(),
                rehydrated: 0,
            });
        }
        self.load(&mut state).await
    }

    async fn load(&self, state: &mut QueueState<T>) -> SyncResult<RehydrationReport> {
        let mut items: Vec<T> = self.store.list().await?;

        let mut rehydrated = Vec::new();
        for item in items.iter_mut() {
            if item.meta_mut().rehydrate() {
                rehydrated.push(item.clone());
            }
        }

        if !rehydrated.is_empty() {
            self.store
                .put_many(
                    rehydrated
                        .iter()
                        .map(|item| (item.id(), item.created_at(), item)),
                )
                .await?;
            info!(
                kind = T::KIND,
                count = rehydrated.len(),
                "Rehydrated interrupted items to pending"
            );
        }

        items.sort_by(|a, b| order(a, b));
        state.items = items;
        state.loaded = true;

        debug!(kind = T::KIND, count = state.items.len(), "Queue loaded");

        Ok(RehydrationReport {
            loaded: state.items.len(),
            rehydrated: rehydrated.len(),
        })
    }

    async fn lock_loaded(&self) -> SyncResult<MutexGuard<'_, QueueState<T>>> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            self.load(&mut state).await?;
        }
        Ok(state)
    }

    fn publish(&self, state: &QueueState<T>) {
        self.broadcaster.publish(Arc::new(state.items.clone()));
    }

    /// Persists and appends a new item.
    pub async fn insert(&self, item: T) -> SyncResult<()> {
        let mut state = self.lock_loaded().await?;

        if state.items.iter().any(|existing| existing.id() == item.id()) {
            return Err(SyncError::Internal(format!(
                "duplicate {} item id {}",
                T::KIND,
                item.id()
            )));
        }

        self.store.put(item.id(), item.created_at(), &item).await?;

        let position = state
            .items
            .partition_point(|existing| order(existing, &item).is_lt());
        debug!(kind = T::KIND, id = %item.id(), "Item enqueued");
        state.items.insert(position, item);

        self.publish(&state);
        Ok(())
    }

    /// Snapshot ordered by `created_at` ascending.
    pub async fn snapshot(&self) -> SyncResult<Vec<T>> {
        Ok(self.lock_loaded().await?.items.clone())
    }

    pub async fn get(&self, id: &str) -> SyncResult<Option<T>> {
        let state = self.lock_loaded().await?;
        Ok(state.items.iter().find(|item| item.id() == id).cloned())
    }

    pub async fn counts(&self) -> SyncResult<QueueCounts> {
        let state = self.lock_loaded().await?;
        Ok(QueueCounts::tally(&state.items))
    }

    /// Subscribes to snapshots, starting with the current one.
    pub async fn subscribe(&self) -> SyncResult<Subscription<T>> {
        let state = self.lock_loaded().await?;
        Ok(self
            .broadcaster
            .subscribe(Arc::new(state.items.clone())))
    }

    /// Moves the oldest `Pending` item to `InProgress` and returns it.
    pub async fn claim_next(&self) -> SyncResult<Option<T>> {
        self.claim_next_where(|_, _| true).await
    }

    /// Like [`claim_next`](Self::claim_next), but only claims a `Pending`
    /// item that `eligible` accepts.
    ///
    /// ## Arguments
    /// * `eligible` - Called with the candidate and every item queued ahead
    ///   of it
    pub async fn claim_next_where(
        &self,
        eligible: impl Fn(&T, &[T]) -> bool,
    ) -> SyncResult<Option<T>> {
        let mut state = self.lock_loaded().await?;

        let Some(index) = state.items.iter().enumerate().position(|(index, item)| {
            item.status() == QueueStatus::Pending && eligible(item, &state.items[..index])
        }) else {
            return Ok(None);
        };

        let mut claimed = state.items[index].clone();
        claimed.meta_mut().mark_in_progress();
        self.store
            .put(claimed.id(), claimed.created_at(), &claimed)
            .await?;

        debug!(kind = T::KIND, id = %claimed.id(), "Item claimed");
        state.items[index] = claimed.clone();
        self.publish(&state);

        Ok(Some(claimed))
    }

    /// Removes an item after its remote operation was confirmed.
    ///
    /// Returns `false` if the item was removed in the meantime.
    pub async fn complete(&self, id: &str) -> SyncResult<bool> {
        let mut state = self.lock_loaded().await?;

        let Some(index) = state.items.iter().position(|item| item.id() == id) else {
            debug!(kind = T::KIND, id = %id, "Completed item already removed");
            return Ok(false);
        };

        self.store.remove(id).await?;
        state.items.remove(index);
        self.publish(&state);

        Ok(true)
    }

    /// Records a failed attempt on an `InProgress` item.
    ///
    /// Returns `false` if the item is gone or no longer in progress.
    pub async fn fail(&self, id: &str, error: &str) -> SyncResult<bool> {
        let mut state = self.lock_loaded().await?;

        let Some(index) = state
            .items
            .iter()
            .position(|item| item.id() == id && item.status() == QueueStatus::InProgress)
        else {
            debug!(kind = T::KIND, id = %id, "Failed item no longer in progress");
            return Ok(false);
        };

        let mut failed = state.items[index].clone();
        failed.meta_mut().mark_failed(error);
        self.store.put(failed.id(), failed.created_at(), &failed).await?;

        state.items[index] = failed;
        self.publish(&state);

        Ok(true)
    }

    /// Marks an `InProgress` item `Failed` in memory only.
    ///
    /// For attempts whose outcome could not be written to the store. The
    /// stored copy stays `InProgress` and reloads as `Pending`, so either
    /// view leaves the item retryable. Returns `false` if the item is gone
    /// or no longer in progress.
    pub async fn release(&self, id: &str, error: &str) -> bool {
        let mut state = self.state.lock().await;

        let Some(item) = state
            .items
            .iter_mut()
            .find(|item| item.id() == id && item.status() == QueueStatus::InProgress)
        else {
            return false;
        };

        item.meta_mut().mark_failed(error);
        warn!(kind = T::KIND, id = %id, error = %error, "Item released without persisting");
        self.publish(&state);
        true
    }

    /// Moves every `Failed` item accepted by `filter` back to `Pending`.
    ///
    /// `Pending` and `InProgress` items are never touched. Returns the ids
    /// that changed.
    pub async fn retry_where(&self, filter: impl Fn(&T) -> bool) -> SyncResult<Vec<String>> {
        let mut state = self.lock_loaded().await?;

        let mut retried: Vec<(usize, T)> = Vec::new();
        for (index, item) in state.items.iter().enumerate() {
            if item.status() == QueueStatus::Failed && filter(item) {
                let mut reset = item.clone();
                reset.meta_mut().reset_to_pending();
                retried.push((index, reset));
            }
        }

        if retried.is_empty() {
            return Ok(Vec::new());
        }

        self.store
            .put_many(
                retried
                    .iter()
                    .map(|(_, item)| (item.id(), item.created_at(), item)),
            )
            .await?;

        let ids: Vec<String> = retried.iter().map(|(_, item)| item.id().to_string()).collect();
        for (index, item) in retried {
            state.items[index] = item;
        }
        self.publish(&state);

        debug!(kind = T::KIND, count = ids.len(), "Failed items reset to pending");
        Ok(ids)
    }

    /// Deletes an item whatever its status. Idempotent.
    pub async fn remove(&self, id: &str) -> SyncResult<Option<T>> {
        let mut state = self.lock_loaded().await?;

        let Some(index) = state.items.iter().position(|item| item.id() == id) else {
            return Ok(None);
        };

        self.store.remove(id).await?;
        let removed = state.items.remove(index);
        self.publish(&state);

        debug!(kind = T::KIND, id = %id, status = %removed.status(), "Item removed");
        Ok(Some(removed))
    }
}

fn order<T: QueueItem>(a: &T, b: &T) -> std::cmp::Ordering {
    a.created_at()
        .cmp(&b.created_at())
        .then_with(|| a.id().cmp(b.id()))
}

// =============================================================================
// Background Worker
// =============================================================================

/// Handle to a queue's background processing loop.
pub(crate) struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns a loop that runs `pass` every time `trigger` fires.
    ///
    /// A trigger that arrives while a pass is running is kept and starts
    /// another pass right after.
    pub(crate) fn spawn<F, Fut>(kind: &'static str, trigger: Arc<Notify>, mut pass: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<ProcessSummary>> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            info!(kind, "Queue worker starting");

            loop {
                tokio::select! {
                    _ = trigger.notified() => {
                        match pass().await {
                            Ok(summary) if summary.attempted() > 0 => {
                                info!(
                                    kind,
                                    succeeded = summary.succeeded,
                                    failed = summary.failed,
                                    skipped = summary.skipped,
                                    "Processing pass finished"
                                );
                            }
                            Ok(_) => debug!(kind, "Nothing to process"),
                            Err(e) => error!(kind, error = %e, "Processing pass failed"),
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        info!(kind, "Queue worker shutting down");
                        break;
                    }
                }
            }

            info!(kind, "Queue worker stopped");
        });

        WorkerHandle { shutdown_tx, join }
    }

    /// Stops the loop after the current pass and waits for it.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "Queue worker task ended abnormally");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
