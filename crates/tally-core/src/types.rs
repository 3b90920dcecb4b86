//! # Domain Types
//!
//! Core types shared by the local store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Domain Types                               │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    TableKind    │   │     Record      │   │   OutboxItem    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Products       │   │  id             │   │  id (seq)       │       │
//! │  │  Inventory      │   │  remoteId?      │   │  table          │       │
//! │  │  Display        │   │  syncStatus     │   │  operation      │       │
//! │  │  Transactions   │   │  lastModified   │   │  recordId       │       │
//! │  │  Settings       │   │  version        │   │  payload        │       │
//! │  └─────────────────┘   │  ...fields      │   │  attempts       │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │   SyncStatus    │   │   SyncState     │                             │
//! │  │  (per record)   │   │  (per agent)    │                             │
//! │  │  pending        │   │  offline        │                             │
//! │  │  synced         │   │  online         │                             │
//! │  │  conflict       │   │  syncing/synced │                             │
//! │  └─────────────────┘   │  error          │                             │
//! │                        └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every synced record has:
//! - `id`: local identifier - stable once assigned, the local primary key
//! - `remoteId`: assigned by the remote service on first successful push

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::CoreError;

/// A record as the remote service sees it (flat lower_snake fields).
pub type RemotePayload = Map<String, Value>;

// =============================================================================
// Table Kind
// =============================================================================

/// The logical tables kept in sync.
///
/// The order of [`TableKind::ALL`] is the order a pull visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Products,
    Inventory,
    Display,
    Transactions,
    Settings,
}

impl TableKind {
    /// Every table, in pull order.
    pub const ALL: [TableKind; 5] = [
        TableKind::Products,
        TableKind::Inventory,
        TableKind::Display,
        TableKind::Transactions,
        TableKind::Settings,
    ];

    /// Local table name (also used as the outbox `table_name` column).
    pub const fn as_str(&self) -> &'static str {
        match self {
            TableKind::Products => "products",
            TableKind::Inventory => "inventory",
            TableKind::Display => "display",
            TableKind::Transactions => "transactions",
            TableKind::Settings => "settings",
        }
    }

    /// Settings merge by key and have no conflict concept.
    #[inline]
    pub const fn is_settings(&self) -> bool {
        matches!(self, TableKind::Settings)
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TableKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableKind::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTable(s.to_string()))
    }
}

// =============================================================================
// Record Sync Status
// =============================================================================

/// Per-record synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local edits not yet confirmed by the remote.
    #[default]
    Pending,
    /// Local state matches the last known remote state.
    Synced,
    /// Both sides changed independently, or pushing failed too many times.
    /// Requires external resolution.
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(CoreError::UnknownSyncStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Record
// =============================================================================

/// One logical entity (product, inventory line, display batch, transaction,
/// setting).
///
/// Serialises as a single flat camelCase object: the sync attributes plus
/// every user-domain field. That JSON form is what the outbox stores as the
/// payload snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Local identifier.
    pub id: String,

    /// Identifier assigned by the remote service once first synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    #[serde(default)]
    pub sync_status: SyncStatus,

    /// Last local or merged-in write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// Optimistic-concurrency marker (last known remote version).
    #[serde(default)]
    pub version: i64,

    /// User-domain fields, keyed by local (camelCase) name.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates an empty pending record with the given local id.
    pub fn new(id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            remote_id: None,
            sync_status: SyncStatus::Pending,
            last_modified: None,
            version: 0,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a user-domain field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    #[inline]
    pub fn is_conflict(&self) -> bool {
        self.sync_status == SyncStatus::Conflict
    }
}

// =============================================================================
// Outbox
// =============================================================================

/// Kind of mutation carried by an outbox item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OutboxOperation {
    Upsert,
    Delete,
}

impl OutboxOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OutboxOperation::Upsert => "upsert",
            OutboxOperation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OutboxOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutboxOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(OutboxOperation::Upsert),
            "delete" => Ok(OutboxOperation::Delete),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// A pending local mutation awaiting transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Queue-local id. Increases with insertion order.
    pub id: i64,
    pub table: TableKind,
    pub operation: OutboxOperation,
    pub record_id: String,
    /// Snapshot of the record at enqueue time.
    pub payload: Record,
    pub created_at: DateTime<Utc>,
    /// Failed transmissions so far.
    pub attempts: i64,
    pub last_error: Option<String>,
}

// =============================================================================
// Agent State & Status Events
// =============================================================================

/// State of the sync agent.
///
/// `OnlineIdle` is reported to the UI as `"online"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Offline,
    #[serde(rename = "online")]
    OnlineIdle,
    Syncing,
    Synced,
    Error,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Offline => write!(f, "offline"),
            SyncState::OnlineIdle => write!(f, "online"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Error => write!(f, "error"),
        }
    }
}

/// Tagged status notification broadcast to the UI layer.
///
/// ```json
/// { "status": "syncing", "message": "Syncing data..." }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncEvent {
    pub status: SyncState,
    pub message: String,
}

impl SyncEvent {
    pub fn new(status: SyncState, message: impl Into<String>) -> Self {
        SyncEvent {
            status,
            message: message.into(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_kind_parsing() {
        for table in TableKind::ALL {
            assert_eq!(table.as_str().parse::<TableKind>().unwrap(), table);
        }
        assert!("customers".parse::<TableKind>().is_err());
    }

    #[test]
    fn test_pull_order_ends_with_settings() {
        assert_eq!(TableKind::ALL[0], TableKind::Products);
        assert_eq!(TableKind::ALL[4], TableKind::Settings);
        assert!(TableKind::Settings.is_settings());
        assert!(!TableKind::Display.is_settings());
    }

    #[test]
    fn test_record_serializes_flat_camel_case() {
        let mut record = Record::new("7").with_field("name", "Feed");
        record.remote_id = Some("r-1".into());
        record.version = 3;

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "7");
        assert_eq!(value["remoteId"], "r-1");
        assert_eq!(value["syncStatus"], "pending");
        assert_eq!(value["version"], 3);
        assert_eq!(value["name"], "Feed");
        assert!(value.get("lastModified").is_none());
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: Record = serde_json::from_value(json!({
            "id": "abc",
            "name": "Layer Pellets",
            "price": 12.5
        }))
        .unwrap();

        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.version, 0);
        assert!(record.remote_id.is_none());
        assert_eq!(record.field("price"), Some(&json!(12.5)));
        assert_eq!(record.fields.len(), 2);
    }

    #[test]
    fn test_sync_state_reports_online_idle_as_online() {
        let event = SyncEvent::new(SyncState::OnlineIdle, "Back online");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "online");
        assert_eq!(SyncState::OnlineIdle.to_string(), "online");
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Conflict] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<OutboxOperation>().is_err());
    }
}
