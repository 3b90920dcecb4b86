//! # Record Repository
//!
//! Local persistence for the five synced tables.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  records                                                                │
//! │  ─────────────────────────────────────────────────────────────────────  │
//! │  table_name │ id │ remote_id │ sync_status │ version │ last_modified │  │
//! │  data (JSON object of user-domain fields, camelCase keys)              │
//! │                                                                         │
//! │  PRIMARY KEY (table_name, id)                                          │
//! │  INDEX (table_name, remote_id)    ← pull reconciler lookups            │
//! │  INDEX (table_name, sync_status)  ← pending / conflict scans           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One physical table backs every logical table; `TableKind` is the
//! partition key. Records are stored exactly as handed in: this layer never
//! changes sync status on its own.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{Record, SyncStatus, TableKind};

/// Raw row as stored.
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    remote_id: Option<String>,
    sync_status: String,
    version: i64,
    last_modified: Option<DateTime<Utc>>,
    data: String,
}

impl TryFrom<RecordRow> for Record {
    type Error = DbError;

    fn try_from(row: RecordRow) -> DbResult<Self> {
        let fields: Map<String, Value> = serde_json::from_str(&row.data)?;
        Ok(Record {
            id: row.id,
            remote_id: row.remote_id,
            sync_status: row.sync_status.parse()?,
            last_modified: row.last_modified,
            version: row.version,
            fields,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, remote_id, sync_status, version, last_modified, data FROM records";

/// Repository for record storage.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.records();
///
/// repo.put(TableKind::Products, &record).await?;
/// let found = repo.find_by_remote_id(TableKind::Products, "42").await?;
/// ```
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    /// Creates a new RecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    /// Gets a record by local id.
    pub async fn get(&self, table: TableKind, id: &str) -> DbResult<Option<Record>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "{SELECT_COLUMNS} WHERE table_name = ?1 AND id = ?2"
        ))
        .bind(table.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Record::try_from).transpose()
    }

    /// Gets a record by local id, failing with `NotFound` if absent.
    pub async fn get_required(&self, table: TableKind, id: &str) -> DbResult<Record> {
        self.get(table, id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("{table} record"), id))
    }

    /// Inserts or replaces a record.
    ///
    /// Every column is taken from `record` as-is, including the sync
    /// attributes.
    pub async fn put(&self, table: TableKind, record: &Record) -> DbResult<()> {
        upsert_row(&self.pool, table, record).await
    }

    /// Inserts a record only if no record with that id exists yet.
    ///
    /// ## Returns
    /// `false` if the id was taken, in which case nothing is written.
    pub async fn insert_new(&self, table: TableKind, record: &Record) -> DbResult<bool> {
        let data = serde_json::to_string(&record.fields)?;

        let result = sqlx::query(
            r#"
            INSERT INTO records (
                table_name, id, remote_id, sync_status, version, last_modified, data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (table_name, id) DO NOTHING
            "#,
        )
        .bind(table.as_str())
        .bind(&record.id)
        .bind(&record.remote_id)
        .bind(record.sync_status.as_str())
        .bind(record.version)
        .bind(record.last_modified)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces a record only while it is still `synced`.
    ///
    /// A local edit that landed after the caller read the record has made it
    /// `pending`, and then this is a no-op.
    ///
    /// ## Returns
    /// `true` if the record was replaced.
    pub async fn replace_if_synced(&self, table: TableKind, record: &Record) -> DbResult<bool> {
        let data = serde_json::to_string(&record.fields)?;

        let result = sqlx::query(
            r#"
            UPDATE records SET
                remote_id = ?3,
                sync_status = ?4,
                version = ?5,
                last_modified = ?6,
                data = ?7
            WHERE table_name = ?1 AND id = ?2 AND sync_status = 'synced'
            "#,
        )
        .bind(table.as_str())
        .bind(&record.id)
        .bind(&record.remote_id)
        .bind(record.sync_status.as_str())
        .bind(record.version)
        .bind(record.last_modified)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a record only while it is still `synced`.
    pub async fn delete_if_synced(&self, table: TableKind, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM records WHERE table_name = ?1 AND id = ?2 AND sync_status = 'synced'",
        )
        .bind(table.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flags a `pending` record as conflict, adopting the remote version.
    ///
    /// User fields are left alone. The remote id is only filled in when the
    /// record has none.
    ///
    /// ## Returns
    /// `false` if the record is no longer `pending`.
    pub async fn flag_conflict(
        &self,
        table: TableKind,
        id: &str,
        version: i64,
        remote_id: Option<&str>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE records SET
                sync_status = 'conflict',
                version = ?3,
                remote_id = COALESCE(remote_id, ?4)
            WHERE table_name = ?1 AND id = ?2 AND sync_status = 'pending'
            "#,
        )
        .bind(table.as_str())
        .bind(id)
        .bind(version)
        .bind(remote_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves a `conflict` record back to `pending`.
    ///
    /// ## Returns
    /// `false` if the record doesn't exist or isn't in conflict.
    pub async fn release_conflict(&self, table: TableKind, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE records SET sync_status = 'pending'
            WHERE table_name = ?1 AND id = ?2 AND sync_status = 'conflict'
            "#,
        )
        .bind(table.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Applies a confirmed push to the sync columns only.
    ///
    /// The status becomes `synced` unless the record is in conflict or still
    /// has queued items other than `outbox_id`, in which case it stays or
    /// becomes `pending`. Evaluated in one statement, so an edit queued while
    /// the request was in flight is never marked synced.
    ///
    /// ## Arguments
    /// * `remote_id` - Id assigned by the remote, if it returned one
    /// * `version` - Version reported by the remote, if any
    /// * `outbox_id` - The queue item that was just confirmed
    pub async fn confirm_push(
        &self,
        table: TableKind,
        id: &str,
        remote_id: Option<&str>,
        version: Option<i64>,
        outbox_id: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE records SET
                remote_id = COALESCE(?3, remote_id),
                version = COALESCE(?4, version),
                sync_status = CASE
                    WHEN sync_status = 'conflict' THEN 'conflict'
                    WHEN EXISTS (
                        SELECT 1 FROM sync_outbox
                        WHERE table_name = ?1 AND record_id = ?2 AND id != ?5
                    ) THEN 'pending'
                    ELSE 'synced'
                END
            WHERE table_name = ?1 AND id = ?2
            "#,
        )
        .bind(table.as_str())
        .bind(id)
        .bind(remote_id)
        .bind(version)
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a record.
    ///
    /// ## Returns
    /// `true` if a row was removed.
    pub async fn delete(&self, table: TableKind, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM records WHERE table_name = ?1 AND id = ?2")
            .bind(table.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Finds the record bound to a remote id.
    pub async fn find_by_remote_id(
        &self,
        table: TableKind,
        remote_id: &str,
    ) -> DbResult<Option<Record>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "{SELECT_COLUMNS} WHERE table_name = ?1 AND remote_id = ?2 LIMIT 1"
        ))
        .bind(table.as_str())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Record::try_from).transpose()
    }

    /// Lists every record of a table, ordered by id.
    pub async fn list(&self, table: TableKind) -> DbResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "{SELECT_COLUMNS} WHERE table_name = ?1 ORDER BY id"
        ))
        .bind(table.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Record::try_from).collect()
    }

    /// Lists the records of a table with the given sync status.
    pub async fn list_by_status(
        &self,
        table: TableKind,
        status: SyncStatus,
    ) -> DbResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "{SELECT_COLUMNS} WHERE table_name = ?1 AND sync_status = ?2 ORDER BY id"
        ))
        .bind(table.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Record::try_from).collect()
    }

    /// Sets only the sync status of a record.
    ///
    /// ## Returns
    /// `true` if the record exists.
    pub async fn set_sync_status(
        &self,
        table: TableKind,
        id: &str,
        status: SyncStatus,
    ) -> DbResult<bool> {
        let result =
            sqlx::query("UPDATE records SET sync_status = ?3 WHERE table_name = ?1 AND id = ?2")
                .bind(table.as_str())
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts records with the given status across all tables.
    pub async fn count_by_status(&self, status: SyncStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE sync_status = ?1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

/// Full-row upsert on any executor, so it can join a transaction.
pub(crate) async fn upsert_row<'e, E>(executor: E, table: TableKind, record: &Record) -> DbResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let data = serde_json::to_string(&record.fields)?;

    debug!(
        table = %table,
        id = %record.id,
        status = %record.sync_status,
        "Writing record"
    );

    sqlx::query(
        r#"
        INSERT INTO records (
            table_name, id, remote_id, sync_status, version, last_modified, data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (table_name, id) DO UPDATE SET
            remote_id = excluded.remote_id,
            sync_status = excluded.sync_status,
            version = excluded.version,
            last_modified = excluded.last_modified,
            data = excluded.data
        "#,
    )
    .bind(table.as_str())
    .bind(&record.id)
    .bind(&record.remote_id)
    .bind(record.sync_status.as_str())
    .bind(record.version)
    .bind(record.last_modified)
    .bind(data)
    .execute(executor)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
