//! # Status Broadcaster
//!
//! In-process publish/subscribe of full state snapshots.
//!
//! ## Delivery Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Snapshot Delivery                                │
//! │                                                                         │
//! │  queue mutation (under the queue lock)                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  publish(Arc<Vec<T>>) ──┬──► Subscription #1  (UI list screen)          │
//! │                         ├──► Subscription #2  (badge counter)           │
//! │                         └──► Subscription #3  (dropped → pruned)        │
//! │                                                                         │
//! │  subscribe() seeds the new channel with the current snapshot, so a     │
//! │  subscriber never has to poll for its initial state.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each queue (and the document cache) owns its own broadcaster, so a
//! subscriber to one never receives another's snapshots. Channels are
//! unbounded: a slow subscriber must never stall a queue worker.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::debug;

/// Shared, immutable view of a collection at one point in time.
pub type Snapshot<T> = Arc<Vec<T>>;

type Registry<T> = Mutex<HashMap<u64, mpsc::UnboundedSender<Snapshot<T>>>>;

struct Subscribers<T> {
    registry: Registry<T>,
    next_id: AtomicU64,
}

impl<T> Subscribers<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<Snapshot<T>>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Fan-out of snapshots to any number of subscribers.
pub struct StatusBroadcaster<T> {
    subscribers: Arc<Subscribers<T>>,
}

impl<T: Send + Sync + 'static> StatusBroadcaster<T> {
    pub fn new() -> Self {
        StatusBroadcaster {
            subscribers: Arc::new(Subscribers {
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a subscriber whose first message is `current`.
    pub fn subscribe(&self, current: Snapshot<T>) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);

        // Cannot fail: the receiver is still in hand.
        let _ = tx.send(current);
        self.subscribers.lock().insert(id, tx);

        debug!(subscriber = id, "Subscriber registered");

        Subscription {
            id,
            rx: Some(rx),
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Sends `snapshot` to every live subscriber and prunes closed ones.
    pub fn publish(&self, snapshot: Snapshot<T>) {
        self.subscribers.lock().retain(|id, tx| {
            let alive = tx.send(Arc::clone(&snapshot)).is_ok();
            if !alive {
                debug!(subscriber = *id, "Pruning closed subscriber");
            }
            alive
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Send + Sync + 'static> Default for StatusBroadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Receiving end of a snapshot stream.
///
/// Dropping the subscription unsubscribes it. Also usable as a
/// [`Stream`] of snapshots.
pub struct Subscription<T> {
    id: u64,
    rx: Option<mpsc::UnboundedReceiver<Snapshot<T>>>,
    subscribers: Weak<Subscribers<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next snapshot.
    ///
    /// Returns `None` once unsubscribed or when the owning queue is gone.
    pub async fn recv(&mut self) -> Option<Snapshot<T>> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Stops delivery. Calling it again does nothing.
    pub fn unsubscribe(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();

        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().remove(&self.id);
            debug!(subscriber = self.id, "Subscriber removed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Stream for Subscription<T> {
    type Item = Snapshot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    /// Test-only non-blocking receive; `None` when nothing is buffered.
    trait TryRecv<T> {
        fn try_recv(&mut self) -> Option<Snapshot<T>>;
    }

    impl<T> TryRecv<T> for Subscription<T> {
        fn try_recv(&mut self) -> Option<Snapshot<T>> {
            self.rx.as_mut()?.try_recv().ok()
        }
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_snapshot() {
        let broadcaster = StatusBroadcaster::new();
        let mut sub = broadcaster.subscribe(Arc::new(vec![1, 2]));

        assert_eq!(*sub.recv().await.unwrap(), vec![1, 2]);

        broadcaster.publish(Arc::new(vec![1, 2, 3]));
        assert_eq!(*sub.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let broadcaster = StatusBroadcaster::new();
        let mut sub = broadcaster.subscribe(Arc::new(vec!["a"]));
        assert_eq!(broadcaster.subscriber_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 0);

        broadcaster.publish(Arc::new(vec!["b"]));
        assert!(sub.recv().await.is_none());
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broadcaster = StatusBroadcaster::new();
        let sub = broadcaster.subscribe(Arc::new(Vec::<u8>::new()));
        assert_eq!(broadcaster.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_broadcaster_dropped() {
        let broadcaster = StatusBroadcaster::new();
        let mut sub = broadcaster.subscribe(Arc::new(vec![0u8]));
        drop(broadcaster);

        sub.unsubscribe();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_buffered_then_stream() {
        let broadcaster = StatusBroadcaster::new();
        let mut sub = broadcaster.subscribe(Arc::new(vec![0]));
        broadcaster.publish(Arc::new(vec![1]));

        assert_eq!(*sub.recv().await.unwrap(), vec![0]);
        assert_eq!(*sub.recv().await.unwrap(), vec![1]);

        broadcaster.publish(Arc::new(vec![3]));
        assert_eq!(*sub.next().await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_independent_broadcasters() {
        let uploads = StatusBroadcaster::new();
        let data = StatusBroadcaster::new();
        let mut upload_sub = uploads.subscribe(Arc::new(vec!["u0"]));
        let _ = upload_sub.recv().await;

        data.publish(Arc::new(vec!["d1"]));
        assert!(upload_sub.try_recv().is_none());
    }
}
