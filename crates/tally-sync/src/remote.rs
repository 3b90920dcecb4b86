//! # Remote Client Seam
//!
//! The contract the sync engine needs from the remote, authoritative
//! service. [`crate::http::HttpRemoteClient`] is the production
//! implementation; tests substitute a scripted in-memory remote.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PullReconciler ──► fetch_changed_since(store, table, since)           │
//! │  PushDrainer    ──► upsert(store, table, row) → stored row             │
//! │                 ──► soft_delete(store, table, remote_id)               │
//! │  SyncAgent      ──► resolve_store_identity() · probe()                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows crossing this seam are already in remote shape (see
//! [`tally_core::schema`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tally_core::{RemotePayload, TableKind};

use crate::error::SyncResult;

/// Remote service operations used by the sync engine.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Resolves the store (tenant) this terminal syncs against.
    async fn resolve_store_identity(&self) -> SyncResult<String>;

    /// Returns rows of `table` changed strictly after `since`, oldest first.
    /// `None` returns every row of the store.
    async fn fetch_changed_since(
        &self,
        store_id: &str,
        table: TableKind,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemotePayload>>;

    /// Inserts or updates a row. A row carrying `id` updates that row.
    ///
    /// ## Returns
    /// The row as stored remotely, including its primary key and version.
    async fn upsert(
        &self,
        store_id: &str,
        table: TableKind,
        row: RemotePayload,
    ) -> SyncResult<RemotePayload>;

    /// Marks a row deleted without physically removing it.
    async fn soft_delete(&self, store_id: &str, table: TableKind, remote_id: &str)
        -> SyncResult<()>;

    /// Cheap reachability check used for connectivity detection.
    async fn probe(&self) -> bool {
        true
    }
}
