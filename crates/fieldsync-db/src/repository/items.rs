//! # Item Store Repository
//!
//! Durable key→item mapping partitioned by namespace.
//!
//! ## Partitioning
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        item_store table                                 │
//! │                                                                         │
//! │  namespace       │ item_key  │ sort_key         │ body (JSON)           │
//! │  ────────────────┼───────────┼──────────────────┼────────────────────── │
//! │  upload_queue    │ 7f3c…     │ 1718000000000000 │ {"status":"pending"…} │
//! │  data_queue      │ a91e…     │ 1718000000100000 │ {"entityType":…}      │
//! │  document_cache  │ doc-42    │ 1718000000200000 │ {"mimeType":…}        │
//! │                                                                         │
//! │  ItemStore(upload_queue) ──► only ever sees upload_queue rows           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every statement carries the namespace in its `WHERE` clause, so one
//! subsystem cannot read or mutate another's partition.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::fmt;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

// =============================================================================
// Namespace
// =============================================================================

/// Partition of the shared stores owned by one subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    UploadQueue,
    DataQueue,
    DocumentCache,
}

impl Namespace {
    /// Stable name used as the SQL partition key and the file store directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::UploadQueue => "upload_queue",
            Namespace::DataQueue => "data_queue",
            Namespace::DocumentCache => "document_cache",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Item Store
// =============================================================================

const UPSERT_SQL: &str = r#"
    INSERT INTO item_store (namespace, item_key, sort_key, body, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (namespace, item_key) DO UPDATE SET
        sort_key = excluded.sort_key,
        body = excluded.body,
        updated_at = excluded.updated_at
"#;

/// Repository for one namespace of the item store.
#[derive(Debug, Clone)]
pub struct ItemStore {
    pool: SqlitePool,
    namespace: Namespace,
}

impl ItemStore {
    /// Creates a store handle bound to `namespace`.
    pub fn new(pool: SqlitePool, namespace: Namespace) -> Self {
        ItemStore { pool, namespace }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Inserts or replaces an item.
    ///
    /// ## Arguments
    /// * `key` - Item id, unique within the namespace
    /// * `sort_key` - Timestamp that orders [`ItemStore::list`]
    /// * `item` - Serialized to JSON
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        sort_key: DateTime<Utc>,
        item: &T,
    ) -> DbResult<()> {
        let body = self.encode(key, item)?;

        sqlx::query(UPSERT_SQL)
            .bind(self.namespace.as_str())
            .bind(key)
            .bind(sort_key.timestamp_micros())
            .bind(body)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        debug!(namespace = %self.namespace, key = %key, "Stored item");
        Ok(())
    }

    /// Inserts or replaces several items in a single transaction.
    ///
    /// Either every item is written or none is.
    pub async fn put_many<'a, T, I>(&self, entries: I) -> DbResult<usize>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = (&'a str, DateTime<Utc>, &'a T)>,
    {
        let mut encoded = Vec::new();
        for (key, sort_key, item) in entries {
            encoded.push((key, sort_key.timestamp_micros(), self.encode(key, item)?));
        }

        if encoded.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        for (key, sort_key, body) in &encoded {
            sqlx::query(UPSERT_SQL)
                .bind(self.namespace.as_str())
                .bind(*key)
                .bind(*sort_key)
                .bind(body.as_str())
                .bind(now.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(namespace = %self.namespace, count = encoded.len(), "Stored items");
        Ok(encoded.len())
    }

    /// Loads one item.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM item_store WHERE namespace = ?1 AND item_key = ?2",
        )
        .bind(self.namespace.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        body.map(|body| {
            serde_json::from_str(&body)
                .map_err(|e| DbError::serialization(self.namespace.as_str(), key, e))
        })
        .transpose()
    }

    /// Loads every item of the namespace, oldest `sort_key` first.
    ///
    /// Rows that no longer decode are skipped with a warning so a single
    /// corrupt row cannot take the whole queue down.
    pub async fn list<T: DeserializeOwned>(&self) -> DbResult<Vec<T>> {
        let rows = sqlx::query(
            r#"
            SELECT item_key, body
            FROM item_store
            WHERE namespace = ?1
            ORDER BY sort_key ASC, item_key ASC
            "#,
        )
        .bind(self.namespace.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("item_key")?;
            let body: String = row.try_get("body")?;

            match serde_json::from_str(&body) {
                Ok(item) => items.push(item),
                Err(e) => warn!(
                    namespace = %self.namespace,
                    key = %key,
                    error = %e,
                    "Skipping item that failed to decode"
                ),
            }
        }

        Ok(items)
    }

    /// Deletes an item. Returns `false` if it did not exist.
    pub async fn remove(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM item_store WHERE namespace = ?1 AND item_key = ?2")
            .bind(self.namespace.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every item in the namespace.
    ///
    /// ## Returns
    /// Number of deleted items.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM item_store WHERE namespace = ?1")
            .bind(self.namespace.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn encode<T: Serialize>(&self, key: &str, item: &T) -> DbResult<String> {
        serde_json::to_string(item)
            .map_err(|e| DbError::serialization(self.namespace.as_str(), key, e))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get_and_overwrite() {
        let db = test_db().await;
        let store = db.items(Namespace::DataQueue);
        let now = Utc::now();

        store.put("a", now, &note("a", "first")).await.unwrap();
        store.put("a", now, &note("a", "second")).await.unwrap();

        let loaded: Option<Note> = store.get("a").await.unwrap();
        assert_eq!(loaded, Some(note("a", "second")));
        let all: Vec<Note> = store.list().await.unwrap();
        assert_eq!(all.len(), 1);

        let missing: Option<Note> = store.get("nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_orders_by_sort_key() {
        let db = test_db().await;
        let store = db.items(Namespace::UploadQueue);
        let base = Utc::now();

        store.put("late", base + Duration::seconds(2), &note("late", "")).await.unwrap();
        store.put("early", base, &note("early", "")).await.unwrap();
        store.put("middle", base + Duration::seconds(1), &note("middle", "")).await.unwrap();

        let items: Vec<Note> = store.list().await.unwrap();
        let ids: Vec<_> = items.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let db = test_db().await;
        let uploads = db.items(Namespace::UploadQueue);
        let data = db.items(Namespace::DataQueue);
        let now = Utc::now();

        uploads.put("shared-key", now, &note("u", "upload")).await.unwrap();
        data.put("shared-key", now, &note("d", "data")).await.unwrap();

        let from_uploads: Option<Note> = uploads.get("shared-key").await.unwrap();
        assert_eq!(from_uploads.unwrap().text, "upload");

        assert_eq!(uploads.clear().await.unwrap(), 1);
        let left: Vec<Note> = uploads.list().await.unwrap();
        assert!(left.is_empty());
        let kept: Vec<Note> = data.list().await.unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let db = test_db().await;
        let store = db.items(Namespace::DocumentCache);

        store.put("doc", Utc::now(), &note("doc", "")).await.unwrap();
        assert!(store.remove("doc").await.unwrap());
        assert!(!store.remove("doc").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_many_writes_all() {
        let db = test_db().await;
        let store = db.items(Namespace::DataQueue);
        let now = Utc::now();
        let a = note("a", "1");
        let b = note("b", "2");

        let written = store
            .put_many([("a", now, &a), ("b", now + Duration::seconds(1), &b)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        let items: Vec<Note> = store.list().await.unwrap();
        assert_eq!(items, vec![a, b]);

        let none: Vec<(&str, DateTime<Utc>, &Note)> = Vec::new();
        assert_eq!(store.put_many(none).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_rows() {
        let db = test_db().await;
        let store = db.items(Namespace::DataQueue);
        let now = Utc::now();

        store.put("good", now, &note("good", "")).await.unwrap();
        sqlx::query(
            "INSERT INTO item_store (namespace, item_key, sort_key, body, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind("data_queue")
        .bind("bad")
        .bind(now.timestamp_micros() + 1)
        .bind("{not json")
        .bind(now.to_rfc3339())
        .execute(db.pool())
        .await
        .unwrap();

        let items: Vec<Note> = store.list().await.unwrap();
        assert_eq!(items.len(), 1);

        let err = store.get::<Note>("bad").await.unwrap_err();
        assert!(matches!(err, DbError::Serialization { .. }));
    }
}
