//! # Repository Module
//!
//! Repository implementations for the local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  SyncAgent / PushDrainer / PullReconciler                              │
//! │       │                                                                 │
//! │       │  db.records().find_by_remote_id(TableKind::Products, "42")     │
//! │       ▼                                                                 │
//! │  RecordRepository   get · put · delete · find_by_remote_id · list      │
//! │  OutboxRepository   enqueue · list_pending · remove · record_attempt   │
//! │  MetaRepository     checkpoint · store_identity                        │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod meta;
pub mod outbox;
pub mod record;
