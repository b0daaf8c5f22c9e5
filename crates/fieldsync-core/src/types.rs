//! # Domain Types
//!
//! Queue items and cached documents shared by every FieldSync subsystem.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │                    ┌─────────────────────┐                              │
//! │                    │     QueueMeta       │                              │
//! │                    │  ─────────────────  │                              │
//! │                    │  id (UUID v4)       │                              │
//! │                    │  status             │                              │
//! │                    │  created_at         │                              │
//! │                    │  attempt_count      │                              │
//! │                    │  last_error         │                              │
//! │                    └──────────┬──────────┘                              │
//! │                 flattened into│                                         │
//! │            ┌──────────────────┴───────────────┐                         │
//! │            ▼                                  ▼                         │
//! │  ┌─────────────────────┐          ┌─────────────────────┐               │
//! │  │  UploadQueueItem    │          │   DataQueueItem     │               │
//! │  │  local_uri (staged) │          │   entity_type       │               │
//! │  │  source_uri         │          │   payload (JSON,    │               │
//! │  │  remote_target      │          │   write-once)       │               │
//! │  └─────────────────────┘          └─────────────────────┘               │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │  CachedDocument     │   │   QueueStatus   │   │   EntityType    │   │
//! │  │  document_id        │   │   Pending       │   │   Visit         │   │
//! │  │  local_uri          │   │   InProgress    │   │   Sheets        │   │
//! │  │  mime_type          │   │   Failed        │   │   Expense       │   │
//! │  │  file_size_bytes    │   └─────────────────┘   │   Attendance    │   │
//! │  └─────────────────────┘                         └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status Lifecycle
//! ```text
//!   enqueue ──► Pending ──claim──► InProgress ──success──► (removed)
//!                  ▲                    │
//!                  │                    └──failure──► Failed
//!                  │                                    │
//!                  └───────────── retry ────────────────┘
//!
//!   cold start: InProgress ──rehydrate──► Pending
//! ```
//! There is no `Done` state. A confirmed item leaves its queue.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Queue Status
// =============================================================================

/// Processing state of a queue item.
///
/// `InProgress` is shown as "uploading" by the upload queue and "syncing"
/// by the data queue; both parse back to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for the processing loop.
    Pending,
    /// A transfer is running right now.
    InProgress,
    /// The last attempt failed; waits for a manual retry or dismissal.
    Failed,
}

impl QueueStatus {
    /// Returns the canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(QueueStatus::Pending),
            "in_progress" | "in-progress" | "uploading" | "syncing" => Ok(QueueStatus::InProgress),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Queue Metadata
// =============================================================================

/// State shared by every queue item, flattened into the concrete item types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueueMeta {
    /// Assigned at enqueue time, never reused.
    pub id: String,

    pub status: QueueStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Number of failed attempts so far.
    #[serde(default)]
    pub attempt_count: u32,

    /// Message of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueMeta {
    /// Creates metadata for a freshly enqueued item.
    pub fn new() -> Self {
        QueueMeta {
            id: Uuid::new_v4().to_string(),
            status: QueueStatus::Pending,
            created_at: Utc::now(),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Marks the item as claimed by the processing loop.
    pub fn mark_in_progress(&mut self) {
        self.status = QueueStatus::InProgress;
    }

    /// Records a failed attempt.
    ///
    /// Increments `attempt_count` by exactly one and keeps the message for
    /// display next to the retry affordance.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = QueueStatus::Failed;
        self.attempt_count += 1;
        self.last_error = Some(error.into());
    }

    /// Moves a failed item back to pending.
    ///
    /// Returns `false` (and changes nothing) for items that are not failed.
    /// `last_error` and `attempt_count` are kept for diagnostics.
    pub fn reset_to_pending(&mut self) -> bool {
        if self.status != QueueStatus::Failed {
            return false;
        }
        self.status = QueueStatus::Pending;
        true
    }

    /// Crash recovery: an item found `InProgress` on load was interrupted
    /// mid-transfer and goes back to `Pending`.
    ///
    /// Returns `true` if the status changed.
    pub fn rehydrate(&mut self) -> bool {
        if self.status != QueueStatus::InProgress {
            return false;
        }
        self.status = QueueStatus::Pending;
        true
    }
}

impl Default for QueueMeta {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Queue Item Trait
// =============================================================================

/// Behaviour the generic queue engine needs from an item type.
pub trait QueueItem: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short label used in log lines ("upload", "data").
    const KIND: &'static str;

    fn meta(&self) -> &QueueMeta;

    fn meta_mut(&mut self) -> &mut QueueMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn status(&self) -> QueueStatus {
        self.meta().status
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.meta().created_at
    }
}

/// Per-status tally of a queue snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Counts items by status.
    pub fn tally<T: QueueItem>(items: &[T]) -> Self {
        items.iter().fold(QueueCounts::default(), |mut counts, item| {
            match item.status() {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::InProgress => counts.in_progress += 1,
                QueueStatus::Failed => counts.failed += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.failed
    }
}

// =============================================================================
// Upload Queue Item
// =============================================================================

/// Where an uploaded blob must land on the remote store.
///
/// ## Example
/// A visit photo attached to the `photo` field of visit `v-123`:
/// ```rust
/// use fieldsync_core::RemoteTarget;
/// let target = RemoteTarget::new("visits", "v-123", "photo");
/// assert!(target.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTarget {
    /// Remote collection (entity kind) that owns the record.
    pub collection: String,
    /// Remote record id.
    pub document_id: String,
    /// Field of the record that references the blob.
    pub field: String,
}

impl RemoteTarget {
    pub fn new(
        collection: impl Into<String>,
        document_id: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        RemoteTarget {
            collection: collection.into(),
            document_id: document_id.into(),
            field: field.into(),
        }
    }

    /// Checks that every segment is present.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("collection", &self.collection),
            ("document_id", &self.document_id),
            ("field", &self.field),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidRemoteTarget(format!("{} is empty", name)));
            }
        }
        Ok(())
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.collection, self.document_id, self.field)
    }
}

/// A binary attachment waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UploadQueueItem {
    #[serde(flatten)]
    pub meta: QueueMeta,

    /// Path of the staged copy inside the local file store.
    pub local_uri: String,

    /// Path the caller handed in (camera roll, picker temp file).
    pub source_uri: String,

    pub remote_target: RemoteTarget,
}

impl UploadQueueItem {
    /// Builds a pending upload for `source_uri`.
    ///
    /// `local_uri` starts out equal to the source; the upload queue points
    /// it at the staged copy before persisting.
    pub fn new(
        source_uri: impl Into<String>,
        remote_target: RemoteTarget,
    ) -> Result<Self, CoreError> {
        let source_uri = source_uri.into();
        if source_uri.trim().is_empty() {
            return Err(CoreError::EmptyLocalUri);
        }
        remote_target.validate()?;

        Ok(UploadQueueItem {
            meta: QueueMeta::new(),
            local_uri: source_uri.clone(),
            source_uri,
            remote_target,
        })
    }
}

impl QueueItem for UploadQueueItem {
    const KIND: &'static str = "upload";

    fn meta(&self) -> &QueueMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut QueueMeta {
        &mut self.meta
    }
}

// =============================================================================
// Data Queue Item
// =============================================================================

/// Kind of domain record a data queue item creates remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Visit,
    /// Daily sales sheets.
    Sheets,
    Expense,
    Attendance,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Visit => "visit",
            EntityType::Sheets => "sheets",
            EntityType::Expense => "expense",
            EntityType::Attendance => "attendance",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "visit" | "visits" => Ok(EntityType::Visit),
            "sheets" | "sheet" => Ok(EntityType::Sheets),
            "expense" | "expenses" => Ok(EntityType::Expense),
            "attendance" => Ok(EntityType::Attendance),
            other => Err(CoreError::UnknownEntityType(other.to_string())),
        }
    }
}

/// A structured record created offline, waiting for remote creation.
///
/// The payload is write-once: the queue only ever touches `meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DataQueueItem {
    #[serde(flatten)]
    pub meta: QueueMeta,

    pub entity_type: EntityType,

    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
}

impl DataQueueItem {
    /// Builds a pending record. A JSON `null` payload is rejected.
    pub fn new(entity_type: EntityType, payload: serde_json::Value) -> Result<Self, CoreError> {
        if payload.is_null() {
            return Err(CoreError::EmptyPayload {
                entity_type: entity_type.to_string(),
            });
        }

        Ok(DataQueueItem {
            meta: QueueMeta::new(),
            entity_type,
            payload,
        })
    }
}

impl QueueItem for DataQueueItem {
    const KIND: &'static str = "data";

    fn meta(&self) -> &QueueMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut QueueMeta {
        &mut self.meta
    }
}

// =============================================================================
// Document Cache Types
// =============================================================================

/// A remote reference document stored locally for offline viewing.
///
/// One record per `document_id`; a re-download overwrites it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CachedDocument {
    /// Id of the remote document record.
    pub document_id: String,

    /// Path of the cached file inside the local file store.
    pub local_uri: String,

    pub mime_type: String,

    /// Size of the file on disk.
    #[ts(type = "number")]
    pub file_size_bytes: u64,

    #[ts(as = "String")]
    pub downloaded_at: DateTime<Utc>,
}

/// How loudly the UI should warn about cache size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CacheWarningLevel {
    #[default]
    None,
    /// Above the soft threshold (100 MB by default).
    Soft,
    /// Above the strong threshold (500 MB by default).
    Strong,
}

impl CacheWarningLevel {
    /// Picks the warning level for `total_bytes`. Thresholds are exclusive.
    pub fn for_size(total_bytes: u64, soft_bytes: u64, strong_bytes: u64) -> Self {
        if total_bytes > strong_bytes {
            CacheWarningLevel::Strong
        } else if total_bytes > soft_bytes {
            CacheWarningLevel::Soft
        } else {
            CacheWarningLevel::None
        }
    }
}

/// Snapshot of local cache consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CacheUsage {
    #[ts(type = "number")]
    pub total_bytes: u64,
    pub document_count: usize,
    pub warning: CacheWarningLevel,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_meta_is_pending() {
        let meta = QueueMeta::new();
        assert_eq!(meta.status, QueueStatus::Pending);
        assert_eq!(meta.attempt_count, 0);
        assert!(meta.last_error.is_none());
        assert!(Uuid::parse_str(&meta.id).is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = QueueMeta::new();
        let b = QueueMeta::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_failure_increments_attempts_by_one() {
        let mut meta = QueueMeta::new();
        meta.mark_in_progress();
        meta.mark_failed("network unreachable");

        assert_eq!(meta.status, QueueStatus::Failed);
        assert_eq!(meta.attempt_count, 1);
        assert_eq!(meta.last_error.as_deref(), Some("network unreachable"));

        assert!(meta.reset_to_pending());
        meta.mark_in_progress();
        meta.mark_failed("timeout");
        assert_eq!(meta.attempt_count, 2);
    }

    #[test]
    fn test_reset_only_touches_failed() {
        let mut meta = QueueMeta::new();
        assert!(!meta.reset_to_pending());
        assert_eq!(meta.status, QueueStatus::Pending);

        meta.mark_in_progress();
        assert!(!meta.reset_to_pending());
        assert_eq!(meta.status, QueueStatus::InProgress);
    }

    #[test]
    fn test_rehydrate_in_progress() {
        let mut meta = QueueMeta::new();
        meta.mark_in_progress();
        assert!(meta.rehydrate());
        assert_eq!(meta.status, QueueStatus::Pending);

        let mut failed = QueueMeta::new();
        failed.mark_failed("boom");
        assert!(!failed.rehydrate());
        assert_eq!(failed.status, QueueStatus::Failed);
    }

    #[test]
    fn test_status_parsing_accepts_display_names() {
        assert_eq!("uploading".parse::<QueueStatus>().unwrap(), QueueStatus::InProgress);
        assert_eq!("syncing".parse::<QueueStatus>().unwrap(), QueueStatus::InProgress);
        assert_eq!("FAILED".parse::<QueueStatus>().unwrap(), QueueStatus::Failed);
        assert!("done".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!("expense".parse::<EntityType>().unwrap(), EntityType::Expense);
        assert_eq!("Visits".parse::<EntityType>().unwrap(), EntityType::Visit);
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_data_item_rejects_null_payload() {
        let err = DataQueueItem::new(EntityType::Expense, serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, CoreError::EmptyPayload { .. }));
    }

    #[test]
    fn test_data_item_json_shape() {
        let item = DataQueueItem::new(EntityType::Expense, json!({ "amount": 500 })).unwrap();
        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["status"], "pending");
        assert_eq!(value["entityType"], "expense");
        assert_eq!(value["attemptCount"], 0);
        assert_eq!(value["payload"]["amount"], 500);
        assert!(value.get("meta").is_none());

        let back: DataQueueItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_upload_item_validation() {
        let target = RemoteTarget::new("visits", "v-1", "photo");
        let item = UploadQueueItem::new("/tmp/photo.jpg", target.clone()).unwrap();
        assert_eq!(item.local_uri, item.source_uri);

        assert_eq!(
            UploadQueueItem::new("  ", target).unwrap_err(),
            CoreError::EmptyLocalUri
        );

        let bad = RemoteTarget::new("visits", "", "photo");
        assert!(matches!(
            UploadQueueItem::new("/tmp/photo.jpg", bad),
            Err(CoreError::InvalidRemoteTarget(_))
        ));
    }

    #[test]
    fn test_counts_tally() {
        let mut a = DataQueueItem::new(EntityType::Visit, json!({})).unwrap();
        let b = DataQueueItem::new(EntityType::Visit, json!({})).unwrap();
        let mut c = DataQueueItem::new(EntityType::Visit, json!({})).unwrap();
        a.meta.mark_in_progress();
        c.meta.mark_failed("rejected");

        let counts = QueueCounts::tally(&[a, b, c]);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_cache_warning_levels() {
        let soft = crate::CACHE_SOFT_WARNING_BYTES;
        let strong = crate::CACHE_STRONG_WARNING_BYTES;

        assert_eq!(CacheWarningLevel::for_size(0, soft, strong), CacheWarningLevel::None);
        assert_eq!(CacheWarningLevel::for_size(soft, soft, strong), CacheWarningLevel::None);
        assert_eq!(CacheWarningLevel::for_size(soft + 1, soft, strong), CacheWarningLevel::Soft);
        assert_eq!(
            CacheWarningLevel::for_size(strong + 1, soft, strong),
            CacheWarningLevel::Strong
        );
    }
}
