//! # Outbox Repository
//!
//! Durable FIFO queue of local mutations awaiting transmission.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL WRITE (SyncAgent::save / delete), one transaction:              │
//! │       │                                                                 │
//! │       ├── 1. records upsert (syncStatus: pending) or delete            │
//! │       └── 2. outbox insert (table, operation, id, <record snapshot>)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            PUSH DRAINER (tally-sync::push)                      │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT * FROM sync_outbox ORDER BY id                      │   │
//! │  │                                                                 │   │
//! │  │  2. For each entry:                                            │   │
//! │  │     a. Send to remote                                          │   │
//! │  │     b. On success: DELETE FROM sync_outbox WHERE id = ?        │   │
//! │  │     c. On failure: UPDATE sync_outbox SET attempts = ?,        │   │
//! │  │                    last_error = ?                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • Every local write is queued, no de-duplication                      │
//! │  • Items leave the queue only on confirmed success (or abandonment)    │
//! │  • Queue ids increase strictly, so ORDER BY id is enqueue order        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::record::upsert_row;
use tally_core::{OutboxItem, OutboxOperation, Record, TableKind};

/// Raw queue row as stored.
#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    table_name: String,
    operation: String,
    record_id: String,
    payload: String,
    created_at: DateTime<Utc>,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxItem {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> DbResult<Self> {
        Ok(OutboxItem {
            id: row.id,
            table: row.table_name.parse()?,
            operation: row.operation.parse()?,
            record_id: row.record_id,
            payload: serde_json::from_str(&row.payload)?,
            created_at: row.created_at,
            attempts: row.attempts,
            last_error: row.last_error,
        })
    }
}

/// Repository for outbox queue operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Appends a mutation to the queue.
    ///
    /// ## Arguments
    /// * `table` - Logical table of the record
    /// * `operation` - Upsert or delete
    /// * `record_id` - Local id of the record
    /// * `payload` - Snapshot of the record at enqueue time
    ///
    /// ## Example
    /// ```rust,ignore
    /// repo.enqueue(TableKind::Products, OutboxOperation::Upsert, &record.id, &record).await?;
    /// ```
    pub async fn enqueue(
        &self,
        table: TableKind,
        operation: OutboxOperation,
        record_id: &str,
        payload: &Record,
    ) -> DbResult<OutboxItem> {
        insert_item(&self.pool, table, operation, record_id, payload).await
    }

    /// Applies a local write and queues it, atomically.
    ///
    /// An upsert stores `record`; a delete removes it. Either way the record
    /// snapshot is queued in the same transaction, so the drainer never sees
    /// the write without its queue item.
    pub async fn write_and_enqueue(
        &self,
        table: TableKind,
        operation: OutboxOperation,
        record: &Record,
    ) -> DbResult<OutboxItem> {
        let mut tx = self.pool.begin().await?;

        match operation {
            OutboxOperation::Upsert => upsert_row(&mut *tx, table, record).await?,
            OutboxOperation::Delete => {
                sqlx::query("DELETE FROM records WHERE table_name = ?1 AND id = ?2")
                    .bind(table.as_str())
                    .bind(&record.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        let item = insert_item(&mut *tx, table, operation, &record.id, record).await?;

        tx.commit().await?;
        Ok(item)
    }

    /// Returns every queued item, oldest first.
    pub async fn list_pending(&self) -> DbResult<Vec<OutboxItem>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, table_name, operation, record_id, payload,
                   created_at, attempts, last_error
            FROM sync_outbox
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutboxItem::try_from).collect()
    }

    /// Removes an item after a confirmed remote success or abandonment.
    pub async fn remove(&self, item_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_outbox WHERE id = ?1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records a failed transmission.
    ///
    /// ## Arguments
    /// * `item_id` - The queue item id
    /// * `attempts` - The new cumulative attempt count
    /// * `error` - Error message describing the failure
    pub async fn record_attempt(&self, item_id: i64, attempts: i64, error: &str) -> DbResult<()> {
        sqlx::query("UPDATE sync_outbox SET attempts = ?2, last_error = ?3 WHERE id = ?1")
            .bind(item_id)
            .bind(attempts)
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Counts queued items.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_outbox")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// True when the record still has a queued item other than `excluding`.
    pub async fn has_pending_for(
        &self,
        table: TableKind,
        record_id: &str,
        excluding: Option<i64>,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sync_outbox
            WHERE table_name = ?1 AND record_id = ?2 AND (?3 IS NULL OR id != ?3)
            "#,
        )
        .bind(table.as_str())
        .bind(record_id)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Writes a newly learned remote id into every queued snapshot of the
    /// record that doesn't carry one yet.
    ///
    /// ## Returns
    /// Number of rewritten items.
    pub async fn backfill_remote_id(
        &self,
        table: TableKind,
        record_id: &str,
        remote_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_outbox
            SET payload = json_set(payload, '$.remoteId', ?3)
            WHERE table_name = ?1
              AND record_id = ?2
              AND json_extract(payload, '$.remoteId') IS NULL
            "#,
        )
        .bind(table.as_str())
        .bind(record_id)
        .bind(remote_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(
                table = %table,
                record_id = %record_id,
                remote_id = %remote_id,
                items = result.rows_affected(),
                "Backfilled remote id into queued items"
            );
        }

        Ok(result.rows_affected())
    }
}

async fn insert_item<'e, E>(
    executor: E,
    table: TableKind,
    operation: OutboxOperation,
    record_id: &str,
    payload: &Record,
) -> DbResult<OutboxItem>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let now = Utc::now();
    let json = serde_json::to_string(payload)?;

    let result = sqlx::query(
        r#"
        INSERT INTO sync_outbox (
            table_name, operation, record_id, payload, created_at, attempts, last_error
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL)
        "#,
    )
    .bind(table.as_str())
    .bind(operation.as_str())
    .bind(record_id)
    .bind(&json)
    .bind(now)
    .execute(executor)
    .await?;

    let id = result.last_insert_rowid();

    debug!(
        outbox_id = id,
        table = %table,
        operation = %operation,
        record_id = %record_id,
        "Queued for sync"
    );

    Ok(OutboxItem {
        id,
        table,
        operation,
        record_id: record_id.to_string(),
        payload: payload.clone(),
        created_at: now,
        attempts: 0,
        last_error: None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn snapshot(id: &str, name: &str) -> Record {
        Record::new(id).with_field("name", name)
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order_without_dedup() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.outbox();

        let first = repo
            .enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &snapshot("7", "A"))
            .await
            .unwrap();
        let second = repo
            .enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &snapshot("7", "B"))
            .await
            .unwrap();
        assert!(second.id > first.id);

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload.field("name").unwrap(), "A");
        assert_eq!(pending[1].payload.field("name").unwrap(), "B");
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(repo.count_pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ids_keep_increasing_after_remove() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.outbox();

        let first = repo
            .enqueue(TableKind::Inventory, OutboxOperation::Upsert, "1", &snapshot("1", "x"))
            .await
            .unwrap();
        repo.remove(first.id).await.unwrap();
        let second = repo
            .enqueue(TableKind::Inventory, OutboxOperation::Delete, "1", &snapshot("1", "x"))
            .await
            .unwrap();

        assert!(second.id > first.id);
        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, OutboxOperation::Delete);
        assert_eq!(pending[0].table, TableKind::Inventory);
    }

    #[tokio::test]
    async fn test_record_attempt() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.outbox();

        let item = repo
            .enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &snapshot("7", "A"))
            .await
            .unwrap();
        repo.record_attempt(item.id, 3, "HTTP 503").await.unwrap();

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending[0].attempts, 3);
        assert_eq!(pending[0].last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_has_pending_for() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.outbox();

        let first = repo
            .enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &snapshot("7", "A"))
            .await
            .unwrap();

        assert!(repo.has_pending_for(TableKind::Products, "7", None).await.unwrap());
        assert!(!repo
            .has_pending_for(TableKind::Products, "7", Some(first.id))
            .await
            .unwrap());
        assert!(!repo.has_pending_for(TableKind::Display, "7", None).await.unwrap());

        repo.enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &snapshot("7", "B"))
            .await
            .unwrap();
        assert!(repo
            .has_pending_for(TableKind::Products, "7", Some(first.id))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_backfill_remote_id() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.outbox();

        repo.enqueue(TableKind::Products, OutboxOperation::Upsert, "7", &snapshot("7", "A"))
            .await
            .unwrap();
        repo.enqueue(TableKind::Products, OutboxOperation::Delete, "7", &snapshot("7", "A"))
            .await
            .unwrap();
        let mut bound = snapshot("8", "C");
        bound.remote_id = Some("other".into());
        repo.enqueue(TableKind::Products, OutboxOperation::Upsert, "8", &bound)
            .await
            .unwrap();

        let rewritten = repo
            .backfill_remote_id(TableKind::Products, "7", "r-42")
            .await
            .unwrap();
        assert_eq!(rewritten, 2);

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending[0].payload.remote_id.as_deref(), Some("r-42"));
        assert_eq!(pending[1].payload.remote_id.as_deref(), Some("r-42"));
        assert_eq!(pending[2].payload.remote_id.as_deref(), Some("other"));
        assert_eq!(pending[0].payload.field("name").unwrap(), "A");
    }

    #[tokio::test]
    async fn test_write_and_enqueue() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.outbox();
        let record = Record::new("7").with_field("name", "Feed");

        let item = repo
            .write_and_enqueue(TableKind::Products, OutboxOperation::Upsert, &record)
            .await
            .unwrap();
        assert_eq!(item.record_id, "7");
        assert!(db.records().get(TableKind::Products, "7").await.unwrap().is_some());

        repo.write_and_enqueue(TableKind::Products, OutboxOperation::Delete, &record)
            .await
            .unwrap();
        assert!(db.records().get(TableKind::Products, "7").await.unwrap().is_none());

        let items = repo.list_pending().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].operation, OutboxOperation::Delete);
    }
}
