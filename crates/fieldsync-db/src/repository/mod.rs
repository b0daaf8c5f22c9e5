//! # Repository Module
//!
//! Persistent item store access for FieldSync.
//!
//! ## Partitioning
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         item_store table                                │
//! │                                                                         │
//! │  namespace        │ item_key │ sort_key │ body (JSON)                  │
//! │  ─────────────────┼──────────┼──────────┼────────────────────────────  │
//! │  upload_queue     │ 7f3c…    │ 17180…   │ {"id":"7f3c…","status":…}    │
//! │  data_queue       │ a1b2…    │ 17180…   │ {"entityType":"expense",…}   │
//! │  document_cache   │ doc-42   │ 17180…   │ {"documentId":"doc-42",…}    │
//! │                                                                         │
//! │  Each subsystem holds an ItemStore bound to exactly one namespace,     │
//! │  so no subsystem can read or mutate another's records.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod items;
