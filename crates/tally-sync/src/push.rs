//! # Push Drainer
//!
//! Transmits the outbox to the remote service, oldest item first.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Push Drainer Flow                               │
//! │                                                                         │
//! │  list_pending() ── snapshot; items queued mid-drain wait for next call │
//! │        │                                                                │
//! │        ▼  per item, in id order                                        │
//! │  ┌──────────────────┐                                                  │
//! │  │ record conflict? │── yes ──► HELD (not sent, no attempt counted)    │
//! │  └────────┬─────────┘                                                  │
//! │           │ no                                                         │
//! │           ▼                                                            │
//! │  ┌──────────────────┐   delete, no remoteId ──► remove (no network)    │
//! │  │ upsert / delete  │   delete, remoteId    ──► soft_delete            │
//! │  └────────┬─────────┘   upsert              ──► upsert → adopt id/ver  │
//! │           │                                     backfill later items   │
//! │     ┌─────┴──────┐                                                     │
//! │     ▼            ▼                                                     │
//! │  success      remote error                                             │
//! │  remove       attempts += 1, lastError                                 │
//! │               attempts >= max ──► record CONFLICT, remove item         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remote errors are isolated per item. A local store error aborts the drain.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tally_core::schema::{id_string, REMOTE_ID, REMOTE_VERSION};
use tally_core::{to_remote, OutboxItem, OutboxOperation, SyncStatus};
use tally_db::Database;

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteClient;

// =============================================================================
// Drain Report
// =============================================================================

/// Outcome counts of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Items confirmed by the remote and removed.
    pub succeeded: usize,
    /// Items that failed and stay queued for another attempt.
    pub failed: usize,
    /// Items that hit the attempt ceiling; their record is now in conflict.
    pub conflicted: usize,
    /// Items skipped because their record is in conflict.
    pub held: usize,
}

impl DrainReport {
    /// Items looked at during the drain.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.conflicted + self.held
    }
}

enum ItemOutcome {
    Sent,
    Held,
}

// =============================================================================
// Push Drainer
// =============================================================================

/// Drains the outbox against a [`RemoteClient`].
pub struct PushDrainer {
    db: Database,
    remote: Arc<dyn RemoteClient>,
    max_attempts: i64,
}

impl PushDrainer {
    /// Creates a drainer.
    ///
    /// ## Arguments
    /// * `db` - Local store (shares the pool with other holders)
    /// * `remote` - Remote service client
    /// * `max_attempts` - Failures after which an item is abandoned and its
    ///   record flagged `conflict`
    pub fn new(db: Database, remote: Arc<dyn RemoteClient>, max_attempts: i64) -> Self {
        PushDrainer {
            db,
            remote,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Processes every item queued at call time, in enqueue order.
    ///
    /// ## Errors
    /// Only local store failures. Remote failures are counted in the report.
    pub async fn drain(&self, store_id: &str) -> SyncResult<DrainReport> {
        let items = self.db.outbox().list_pending().await?;
        let mut report = DrainReport::default();

        if items.is_empty() {
            debug!("Outbox empty, nothing to push");
            return Ok(report);
        }

        info!(count = items.len(), "Draining outbox");

        for item in items {
            match self.push_item(store_id, &item).await {
                Ok(ItemOutcome::Sent) => {
                    self.db.outbox().remove(item.id).await?;
                    report.succeeded += 1;
                }
                Ok(ItemOutcome::Held) => {
                    debug!(
                        outbox_id = item.id,
                        table = %item.table,
                        record_id = %item.record_id,
                        "Record in conflict, holding queued item"
                    );
                    report.held += 1;
                }
                Err(e @ SyncError::Store(_)) => return Err(e),
                Err(e) => {
                    if self.record_failure(&item, &e).await? {
                        report.conflicted += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            conflicted = report.conflicted,
            held = report.held,
            "Outbox drain finished"
        );

        Ok(report)
    }

    async fn push_item(&self, store_id: &str, item: &OutboxItem) -> SyncResult<ItemOutcome> {
        let records = self.db.records();
        let local = records.get(item.table, &item.record_id).await?;

        if local.as_ref().is_some_and(|r| r.is_conflict()) {
            return Ok(ItemOutcome::Held);
        }

        // A snapshot queued before the record learned its remote id.
        let known_remote_id = item
            .payload
            .remote_id
            .clone()
            .or_else(|| local.and_then(|r| r.remote_id));

        match item.operation {
            OutboxOperation::Delete => {
                match known_remote_id.as_deref() {
                    Some(remote_id) => {
                        self.remote
                            .soft_delete(store_id, item.table, remote_id)
                            .await?;
                        debug!(table = %item.table, remote_id, "Remote row soft-deleted");
                    }
                    None => {
                        debug!(
                            table = %item.table,
                            record_id = %item.record_id,
                            "Never pushed, dropping delete without a remote call"
                        );
                    }
                }
                Ok(ItemOutcome::Sent)
            }
            OutboxOperation::Upsert => {
                let mut snapshot = item.payload.clone();
                snapshot.remote_id = known_remote_id.clone();
                let row = to_remote(item.table, &snapshot);
                let stored = self.remote.upsert(store_id, item.table, row).await?;

                let remote_id = id_string(stored.get(REMOTE_ID)).or(known_remote_id);
                let remote_version = stored.get(REMOTE_VERSION).and_then(Value::as_i64);

                // Sync columns only: the record may have been edited while the
                // request was in flight.
                records
                    .confirm_push(
                        item.table,
                        &item.record_id,
                        remote_id.as_deref(),
                        remote_version,
                        item.id,
                    )
                    .await?;

                if let Some(remote_id) = remote_id.as_deref() {
                    self.db
                        .outbox()
                        .backfill_remote_id(item.table, &item.record_id, remote_id)
                        .await?;
                }

                debug!(
                    table = %item.table,
                    record_id = %item.record_id,
                    remote_id = ?remote_id,
                    "Upsert confirmed"
                );
                Ok(ItemOutcome::Sent)
            }
        }
    }

    /// Counts a failed transmission.
    ///
    /// ## Returns
    /// `true` when the ceiling was reached and the item abandoned.
    async fn record_failure(&self, item: &OutboxItem, error: &SyncError) -> SyncResult<bool> {
        let attempts = item.attempts + 1;
        let message = error.to_string();

        if attempts >= self.max_attempts {
            warn!(
                outbox_id = item.id,
                table = %item.table,
                record_id = %item.record_id,
                attempts,
                error = %message,
                "Push attempts exhausted, flagging record as conflict"
            );
            self.db
                .records()
                .set_sync_status(item.table, &item.record_id, SyncStatus::Conflict)
                .await?;
            self.db.outbox().remove(item.id).await?;
            return Ok(true);
        }

        debug!(
            outbox_id = item.id,
            attempts,
            retryable = error.is_retryable(),
            error = %message,
            "Push failed, will retry"
        );
        self.db
            .outbox()
            .record_attempt(item.id, attempts, &message)
            .await?;
        Ok(false)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRemote, RemoteCall};
    use serde_json::json;
    use tally_core::{Record, TableKind};

    async fn setup(remote: Arc<MockRemote>) -> (Database, PushDrainer) {
        let db = Database::in_memory().await.unwrap();
        let drainer = PushDrainer::new(db.clone(), remote, 5);
        (db, drainer)
    }

    async fn save_pending(db: &Database, table: TableKind, record: &Record) {
        db.outbox()
            .write_and_enqueue(table, OutboxOperation::Upsert, record)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_adopts_remote_id_and_syncs() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        let record = Record::new("7").with_field("name", "Feed");
        save_pending(&db, TableKind::Products, &record).await;

        let report = drainer.drain("store-1").await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(db.outbox().count_pending().await.unwrap(), 0);

        let stored = db.records().get_required(TableKind::Products, "7").await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.remote_id.as_deref(), Some("r-1"));
        assert_eq!(stored.version, 1);
        assert_eq!(remote.rows(TableKind::Products)[0]["local_id"], "7");
    }

    #[tokio::test]
    async fn test_two_edits_drain_in_order() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        let first = Record::new("7").with_field("name", "Feed");
        save_pending(&db, TableKind::Products, &first).await;
        let second = Record::new("7").with_field("name", "Feed Premium");
        save_pending(&db, TableKind::Products, &second).await;

        let report = drainer.drain("store-1").await.unwrap();
        assert_eq!(report.succeeded, 2);

        let upserts: Vec<_> = remote
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Upsert(_, row) => Some(row),
                _ => None,
            })
            .collect();
        assert_eq!(upserts[0]["name"], "Feed");
        assert!(!upserts[0].contains_key("id"));
        // The second snapshot was backfilled with the id from the first push.
        assert_eq!(upserts[1]["id"], "r-1");

        let rows = remote.rows(TableKind::Products);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Feed Premium");
        assert_eq!(rows[0]["version"], 2);
    }

    #[tokio::test]
    async fn test_record_stays_pending_while_later_items_queued() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        let record = Record::new("7").with_field("name", "Feed");
        save_pending(&db, TableKind::Products, &record).await;
        save_pending(&db, TableKind::Products, &record).await;

        // Push only the first of the two queued snapshots.
        let items = db.outbox().list_pending().await.unwrap();
        drainer.push_item("store-1", &items[0]).await.unwrap();

        let stored = db.records().get_required(TableKind::Products, "7").await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.remote_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn test_four_failures_keep_item_queued() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        save_pending(&db, TableKind::Products, &Record::new("7").with_field("name", "Feed")).await;
        remote.fail_next_upserts(4);

        for _ in 0..4 {
            let report = drainer.drain("store-1").await.unwrap();
            assert_eq!(report.failed, 1);
        }

        let items = db.outbox().list_pending().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempts, 4);
        assert!(items[0].last_error.as_deref().unwrap().contains("simulated outage"));

        let stored = db.records().get_required(TableKind::Products, "7").await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_fifth_failure_flags_conflict() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        save_pending(&db, TableKind::Products, &Record::new("7").with_field("name", "Feed")).await;
        remote.fail_next_upserts(5);

        for _ in 0..4 {
            drainer.drain("store-1").await.unwrap();
        }
        let report = drainer.drain("store-1").await.unwrap();
        assert_eq!(report.conflicted, 1);

        assert_eq!(db.outbox().count_pending().await.unwrap(), 0);
        let stored = db.records().get_required(TableKind::Products, "7").await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Conflict);
    }

    #[tokio::test]
    async fn test_delete_without_remote_id_skips_network() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        let record = Record::new("9");
        db.outbox()
            .enqueue(TableKind::Inventory, OutboxOperation::Delete, "9", &record)
            .await
            .unwrap();

        let report = drainer.drain("store-1").await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(remote.calls().is_empty());
        assert_eq!(db.outbox().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_with_remote_id_soft_deletes() {
        let remote = Arc::new(MockRemote::new());
        remote.seed(TableKind::Inventory, json!({ "id": "r-9", "local_id": "9" }));
        let (db, drainer) = setup(remote.clone()).await;

        let mut record = Record::new("9");
        record.remote_id = Some("r-9".into());
        db.outbox()
            .enqueue(TableKind::Inventory, OutboxOperation::Delete, "9", &record)
            .await
            .unwrap();

        drainer.drain("store-1").await.unwrap();
        assert_eq!(
            remote.calls(),
            vec![RemoteCall::SoftDelete(TableKind::Inventory, "r-9".into())]
        );
        assert_eq!(remote.rows(TableKind::Inventory)[0]["is_deleted"], true);
    }

    #[tokio::test]
    async fn test_conflicted_record_is_held() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        let mut record = Record::new("7").with_field("name", "Feed");
        save_pending(&db, TableKind::Products, &record).await;
        record.sync_status = SyncStatus::Conflict;
        db.records().put(TableKind::Products, &record).await.unwrap();

        let report = drainer.drain("store-1").await.unwrap();
        assert_eq!(report.held, 1);
        assert_eq!(report.total(), 1);
        assert!(remote.calls().is_empty());

        let items = db.outbox().list_pending().await.unwrap();
        assert_eq!(items[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_later_items() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        save_pending(&db, TableKind::Products, &Record::new("1").with_field("name", "A")).await;
        save_pending(&db, TableKind::Products, &Record::new("2").with_field("name", "B")).await;
        remote.fail_next_upserts(1);

        let report = drainer.drain("store-1").await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);

        let second = db.records().get_required(TableKind::Products, "2").await.unwrap();
        assert_eq!(second.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_snapshot_without_remote_id_uses_record_binding() {
        let remote = Arc::new(MockRemote::new());
        remote.seed(TableKind::Products, json!({ "id": "r-7", "local_id": "7", "version": 2 }));
        let (db, drainer) = setup(remote.clone()).await;

        // Queued before the record was bound to r-7.
        let record = Record::new("7").with_field("name", "Feed");
        db.outbox()
            .enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &record)
            .await
            .unwrap();
        let mut bound = record.clone();
        bound.remote_id = Some("r-7".into());
        db.records().put(TableKind::Products, &bound).await.unwrap();

        drainer.drain("store-1").await.unwrap();

        let rows = remote.rows(TableKind::Products);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Feed");
        assert_eq!(rows[0]["version"], 3);
    }

    #[tokio::test]
    async fn test_confirm_keeps_edit_made_during_push() {
        let remote = Arc::new(MockRemote::new());
        let (db, drainer) = setup(remote.clone()).await;

        save_pending(&db, TableKind::Products, &Record::new("7").with_field("name", "Feed")).await;
        let items = db.outbox().list_pending().await.unwrap();

        // Edit lands after the drainer picked up the first snapshot.
        save_pending(&db, TableKind::Products, &Record::new("7").with_field("name", "Feed Premium"))
            .await;
        drainer.push_item("store-1", &items[0]).await.unwrap();

        let stored = db.records().get_required(TableKind::Products, "7").await.unwrap();
        assert_eq!(stored.field("name").unwrap(), "Feed Premium");
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.remote_id.as_deref(), Some("r-1"));
    }
}
