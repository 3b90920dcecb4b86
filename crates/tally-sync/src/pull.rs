//! # Pull Reconciler
//!
//! Fetches remote changes and merges them into the local store.
//!
//! ## Merge Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Pull / Merge Decision Table                       │
//! │                                                                         │
//! │  settings            ──► overwrite by key (soft-deleted ⇒ remove)      │
//! │                                                                         │
//! │  other tables, resolve target: local_id (unless bound to another       │
//! │  remote id), else remoteId                                             │
//! │                                                                         │
//! │  ┌──────────────┬───────────────────────┬─────────────────────────────┐ │
//! │  │ local match  │ remote row live       │ remote row soft-deleted     │ │
//! │  ├──────────────┼───────────────────────┼─────────────────────────────┤ │
//! │  │ none         │ insert (synced)       │ ignore                      │ │
//! │  │ synced       │ remote wins           │ delete locally              │ │
//! │  │ pending      │ remote ver > local ⇒  │ same as live                │ │
//! │  │              │ CONFLICT, else keep   │                             │ │
//! │  │ conflict     │ untouched             │ untouched                   │ │
//! │  └──────────────┴───────────────────────┴─────────────────────────────┘ │
//! │                                                                         │
//! │  Tables are visited in TableKind::ALL order. Any fetch or store error  │
//! │  aborts the pull.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pending record is never overwritten silently: a remote version that is
//! not newer than the local one leaves it as is, a newer one flags it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::{from_remote, IncomingRecord, Record, SyncStatus, TableKind};
use tally_db::{Database, RecordRepository};

use crate::error::SyncResult;
use crate::remote::RemoteClient;

const SETTINGS_KEY: &str = "key";

// =============================================================================
// Pull Report
// =============================================================================

/// Merge statistics for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub conflicted: usize,
    pub deleted: usize,
    pub skipped: usize,
}

/// Merge statistics for one pull, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub tables: BTreeMap<TableKind, TableReport>,
}

impl PullReport {
    /// Rows received across every table.
    pub fn fetched(&self) -> usize {
        self.tables.values().map(|t| t.fetched).sum()
    }

    /// Records newly flagged as conflict across every table.
    pub fn conflicted(&self) -> usize {
        self.tables.values().map(|t| t.conflicted).sum()
    }

    /// Statistics for one table (zeroes if it was not visited).
    pub fn table(&self, table: TableKind) -> TableReport {
        self.tables.get(&table).copied().unwrap_or_default()
    }
}

enum Merge {
    Inserted,
    Updated,
    Conflicted,
    Deleted,
    Skipped,
}

// =============================================================================
// Pull Reconciler
// =============================================================================

/// Merges remote changes into the local store.
pub struct PullReconciler {
    db: Database,
    remote: Arc<dyn RemoteClient>,
}

impl PullReconciler {
    pub fn new(db: Database, remote: Arc<dyn RemoteClient>) -> Self {
        PullReconciler { db, remote }
    }

    /// Pulls every table changed after `since` (`None` pulls everything).
    pub async fn pull(
        &self,
        store_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<PullReport> {
        let mut report = PullReport::default();

        for table in TableKind::ALL {
            let rows = self
                .remote
                .fetch_changed_since(store_id, table, since)
                .await?;

            let mut stats = TableReport {
                fetched: rows.len(),
                ..Default::default()
            };

            for row in &rows {
                let incoming = from_remote(table, row);
                let merge = if table.is_settings() {
                    self.merge_setting(incoming).await?
                } else {
                    self.merge_record(table, incoming).await?
                };

                match merge {
                    Merge::Inserted => stats.inserted += 1,
                    Merge::Updated => stats.updated += 1,
                    Merge::Conflicted => stats.conflicted += 1,
                    Merge::Deleted => stats.deleted += 1,
                    Merge::Skipped => stats.skipped += 1,
                }
            }

            if stats.fetched > 0 {
                debug!(
                    table = %table,
                    fetched = stats.fetched,
                    inserted = stats.inserted,
                    updated = stats.updated,
                    conflicted = stats.conflicted,
                    deleted = stats.deleted,
                    "Table merged"
                );
            }
            report.tables.insert(table, stats);
        }

        info!(
            fetched = report.fetched(),
            conflicted = report.conflicted(),
            "Pull finished"
        );

        Ok(report)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    async fn merge_setting(&self, incoming: IncomingRecord) -> SyncResult<Merge> {
        let key = incoming.local_id.clone().or_else(|| {
            incoming
                .fields
                .get(SETTINGS_KEY)
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let Some(key) = key else {
            warn!(remote_id = ?incoming.remote_id, "Setting row without a key, ignoring");
            return Ok(Merge::Skipped);
        };

        let records = self.db.records();
        if incoming.deleted {
            let removed = records.delete(TableKind::Settings, &key).await?;
            return Ok(if removed { Merge::Deleted } else { Merge::Skipped });
        }

        let existed = records.get(TableKind::Settings, &key).await?.is_some();
        records
            .put(TableKind::Settings, &incoming.into_record(key))
            .await?;

        Ok(if existed { Merge::Updated } else { Merge::Inserted })
    }

    // =========================================================================
    // Records
    // =========================================================================

    async fn merge_record(&self, table: TableKind, incoming: IncomingRecord) -> SyncResult<Merge> {
        let records = self.db.records();

        let Some(local) = resolve_target(&records, table, &incoming).await? else {
            if incoming.deleted {
                return Ok(Merge::Skipped);
            }
            let id = self.fresh_local_id(&records, table, &incoming).await?;
            debug!(table = %table, id = %id, remote_id = ?incoming.remote_id, "Inserting remote record");
            return Ok(if records.insert_new(table, &incoming.into_record(id)).await? {
                Merge::Inserted
            } else {
                Merge::Skipped
            });
        };

        // Writes below are conditional on the status observed here, so a
        // local save that lands mid-merge is never overwritten.
        match local.sync_status {
            SyncStatus::Conflict => Ok(Merge::Skipped),
            SyncStatus::Pending => {
                if incoming.version <= local.version {
                    return Ok(Merge::Skipped);
                }
                let remote_id = local.remote_id.as_deref().or(incoming.remote_id.as_deref());
                if !records
                    .flag_conflict(table, &local.id, incoming.version, remote_id)
                    .await?
                {
                    return Ok(Merge::Skipped);
                }
                if let Some(remote_id) = remote_id {
                    self.db
                        .outbox()
                        .backfill_remote_id(table, &local.id, remote_id)
                        .await?;
                }
                warn!(
                    table = %table,
                    id = %local.id,
                    local_version = local.version,
                    remote_version = incoming.version,
                    "Remote changed a record with unpushed edits, flagging conflict"
                );
                Ok(Merge::Conflicted)
            }
            SyncStatus::Synced if incoming.deleted => {
                if !records.delete_if_synced(table, &local.id).await? {
                    return Ok(Merge::Skipped);
                }
                debug!(table = %table, id = %local.id, "Remote soft delete applied");
                Ok(Merge::Deleted)
            }
            SyncStatus::Synced => {
                let keep_remote_id = local.remote_id.clone();
                let mut replaced = incoming.into_record(local.id);
                if replaced.remote_id.is_none() {
                    replaced.remote_id = keep_remote_id;
                }
                Ok(if records.replace_if_synced(table, &replaced).await? {
                    Merge::Updated
                } else {
                    Merge::Skipped
                })
            }
        }
    }

    /// The remote's correlation id when it is free, a new uuid otherwise.
    async fn fresh_local_id(
        &self,
        records: &RecordRepository,
        table: TableKind,
        incoming: &IncomingRecord,
    ) -> SyncResult<String> {
        if let Some(id) = incoming.local_id.as_deref() {
            if records.get(table, id).await?.is_none() {
                return Ok(id.to_string());
            }
        }
        Ok(Uuid::new_v4().to_string())
    }
}

/// Finds the local record a remote row belongs to.
///
/// A `local_id` match is ignored when that local record is already bound to
/// a different remote id (another terminal reused the same local id).
async fn resolve_target(
    records: &RecordRepository,
    table: TableKind,
    incoming: &IncomingRecord,
) -> SyncResult<Option<Record>> {
    if let Some(local_id) = incoming.local_id.as_deref() {
        if let Some(record) = records.get(table, local_id).await? {
            let bound_elsewhere = matches!(
                (&record.remote_id, &incoming.remote_id),
                (Some(ours), Some(theirs)) if ours != theirs
            );
            if !bound_elsewhere {
                return Ok(Some(record));
            }
        }
    }

    match incoming.remote_id.as_deref() {
        Some(remote_id) => Ok(records.find_by_remote_id(table, remote_id).await?),
        None => Ok(None),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
