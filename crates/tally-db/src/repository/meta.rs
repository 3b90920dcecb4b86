//! # Sync Metadata Repository
//!
//! Key/value bookkeeping owned by the sync agent.
//!
//! | key                | value                                   |
//! |--------------------|-----------------------------------------|
//! | `last_sync_time`   | RFC 3339 checkpoint of the last full sync |
//! | `store_identity`   | Cached remote store id                  |

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::DbResult;

const LAST_SYNC_TIME: &str = "last_sync_time";
const STORE_IDENTITY: &str = "store_identity";

/// Repository for the `sync_meta` table.
#[derive(Debug, Clone)]
pub struct MetaRepository {
    pool: SqlitePool,
}

impl MetaRepository {
    /// Creates a new MetaRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MetaRepository { pool }
    }

    /// Reads a raw value.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Writes a raw value, replacing any previous one.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the sync checkpoint, if a full sync ever completed.
    ///
    /// An unparseable stored value is treated as absent, which makes the
    /// next pull a full one.
    pub async fn checkpoint(&self) -> DbResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.get(LAST_SYNC_TIME).await? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(e) => {
                warn!(value = %raw, error = %e, "Ignoring unreadable sync checkpoint");
                Ok(None)
            }
        }
    }

    /// Advances the sync checkpoint.
    pub async fn set_checkpoint(&self, at: DateTime<Utc>) -> DbResult<()> {
        debug!(checkpoint = %at, "Advancing sync checkpoint");
        self.set(LAST_SYNC_TIME, &at.to_rfc3339()).await
    }

    /// Returns the cached store identity.
    pub async fn store_identity(&self) -> DbResult<Option<String>> {
        self.get(STORE_IDENTITY).await
    }

    /// Caches the store identity for offline startups.
    pub async fn set_store_identity(&self, store_id: &str) -> DbResult<()> {
        self.set(STORE_IDENTITY, store_id).await
    }
}
