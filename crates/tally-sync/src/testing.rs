//! Scripted in-memory remote used by the engine tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;

use tally_core::schema::{id_string, REMOTE_ID, REMOTE_IS_DELETED, REMOTE_STORE_ID, REMOTE_UPDATED_AT, REMOTE_VERSION};
use tally_core::{RemotePayload, TableKind};

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteClient;

/// One call made against the mock, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RemoteCall {
    Resolve,
    Fetch(TableKind),
    Upsert(TableKind, RemotePayload),
    SoftDelete(TableKind, String),
}

#[derive(Default)]
struct MockState {
    store_id: Option<String>,
    rows: BTreeMap<TableKind, Vec<RemotePayload>>,
    calls: Vec<RemoteCall>,
    upsert_failures: usize,
    fetch_failure: bool,
    next_id: u64,
}

/// Pauses the first fetch until released.
pub(crate) struct FetchGate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub(crate) struct MockRemote {
    state: Mutex<MockState>,
    gate: Mutex<Option<FetchGate>>,
}

pub(crate) fn row(value: Value) -> RemotePayload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

impl MockRemote {
    /// A reachable remote serving store `store-1`.
    pub fn new() -> Self {
        let remote = MockRemote::default();
        remote.lock().store_id = Some("store-1".to_string());
        remote
    }

    /// A remote that refuses to reveal a store identity.
    pub fn without_identity() -> Self {
        MockRemote::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts a row on the "server" without logging a call.
    pub fn seed(&self, table: TableKind, value: Value) {
        self.lock().rows.entry(table).or_default().push(row(value));
    }

    pub fn fail_next_upserts(&self, count: usize) {
        self.lock().upsert_failures = count;
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.lock().fetch_failure = fail;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn rows(&self, table: TableKind) -> Vec<RemotePayload> {
        self.lock().rows.get(&table).cloned().unwrap_or_default()
    }

    /// Makes the next fetch wait; returns `(entered, release)`.
    pub fn gate_next_fetch(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(FetchGate {
            entered: entered.clone(),
            release: release.clone(),
        });
        (entered, release)
    }
}

fn updated_after(row: &RemotePayload, since: Option<DateTime<Utc>>) -> bool {
    let Some(since) = since else { return true };
    row.get(REMOTE_UPDATED_AT)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map_or(true, |at| at.with_timezone(&Utc) > since)
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn resolve_store_identity(&self) -> SyncResult<String> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Resolve);
        state.store_id.clone().ok_or(SyncError::RemoteRejected {
            status: 401,
            message: "no store".into(),
        })
    }

    async fn fetch_changed_since(
        &self,
        _store_id: &str,
        table: TableKind,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemotePayload>> {
        self.lock().calls.push(RemoteCall::Fetch(table));

        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let state = self.lock();
        if state.fetch_failure {
            return Err(SyncError::ConnectionFailed("simulated outage".into()));
        }
        Ok(state
            .rows
            .get(&table)
            .map(|rows| rows.iter().filter(|r| updated_after(r, since)).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(
        &self,
        store_id: &str,
        table: TableKind,
        row: RemotePayload,
    ) -> SyncResult<RemotePayload> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Upsert(table, row.clone()));

        if state.upsert_failures > 0 {
            state.upsert_failures -= 1;
            return Err(SyncError::ConnectionFailed("simulated outage".into()));
        }

        let now = Value::String(Utc::now().to_rfc3339());
        let mut stored = row;
        stored.insert(REMOTE_STORE_ID.into(), Value::String(store_id.into()));
        stored.insert(REMOTE_UPDATED_AT.into(), now);

        let existing_id = id_string(stored.get(REMOTE_ID));
        let rows = state.rows.entry(table).or_default();
        if let Some(existing) = existing_id
            .as_deref()
            .and_then(|id| rows.iter_mut().find(|r| id_string(r.get(REMOTE_ID)).as_deref() == Some(id)))
        {
            let version = existing.get(REMOTE_VERSION).and_then(Value::as_i64).unwrap_or(1);
            existing.extend(stored);
            existing.insert(REMOTE_VERSION.into(), Value::from(version + 1));
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let id = format!("r-{}", state.next_id);
        stored.insert(REMOTE_ID.into(), Value::String(id));
        stored.insert(REMOTE_VERSION.into(), Value::from(1));
        state.rows.entry(table).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn soft_delete(
        &self,
        _store_id: &str,
        table: TableKind,
        remote_id: &str,
    ) -> SyncResult<()> {
        let mut state = self.lock();
        state
            .calls
            .push(RemoteCall::SoftDelete(table, remote_id.to_string()));

        let row = state
            .rows
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|r| id_string(r.get(REMOTE_ID)).as_deref() == Some(remote_id))
            .ok_or(SyncError::RemoteRejected {
                status: 404,
                message: format!("{remote_id} not found"),
            })?;
        row.insert(REMOTE_IS_DELETED.into(), Value::Bool(true));
        Ok(())
    }
}
