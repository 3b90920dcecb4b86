//! # Sync Agent
//!
//! Orchestrates the engine: tracks connectivity, runs sync passes under a
//! single-flight guard, owns the application write path and broadcasts
//! status events to the UI.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   NetworkEvent ──┐     SyncNow ──┐      interval tick (auto mode)      │
//! │                  ▼               ▼               │                      │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncAgent::run  (tokio::select!)               │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │  SyncGuard (single flight)             │
//! │           ┌───────────────────┴───────────────────┐                    │
//! │           ▼                                       ▼                    │
//! │  ┌─────────────────────────┐         ┌─────────────────────────────┐   │
//! │  │ Reconnect fast path     │         │ Full sync                   │   │
//! │  │ 1. PushDrainer::drain   │         │ 1. PullReconciler::pull     │   │
//! │  │ 2. PullReconciler::pull │         │ 2. PushDrainer::drain       │   │
//! │  │ checkpoint untouched    │         │ 3. checkpoint = pass start  │   │
//! │  └─────────────────────────┘         └─────────────────────────────┘   │
//! │                                                                         │
//! │  STATE MACHINE:                                                        │
//! │  offline ──online──► online ──pass──► syncing ──► synced | error      │
//! │     ▲                                                  │               │
//! │     └──────────────────── offline (any time) ──────────┘               │
//! │                                                                         │
//! │  STATUS EVENTS: { status, message } to every SyncEventEmitter, in      │
//! │  registration order, then to the broadcast channel.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Going offline mid-pass does not cancel the pass; the pass finishes but
//! leaves the `offline` state in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use tally_core::{
    OutboxOperation, Record, SyncEvent, SyncState, SyncStatus, TableKind, UNSYNCED_VERSION,
};
use tally_db::Database;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::pull::{PullReconciler, PullReport};
use crate::push::{DrainReport, PushDrainer};
use crate::remote::RemoteClient;

// =============================================================================
// Constants
// =============================================================================

/// Capacity of the status broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the agent command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Keys owned by the engine; stripped from application input.
const ENGINE_FIELDS: [&str; 5] = ["id", "remoteId", "syncStatus", "lastModified", "version"];

const SETTINGS_KEY: &str = "key";

/// Broadcast on a failed pass; the cause goes to `last_error` only.
const SYNC_FAILED_MESSAGE: &str = "Sync failed";

// =============================================================================
// Public Types
// =============================================================================

/// Connectivity change reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

/// Why a sync request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass holds the single-flight guard.
    AlreadySyncing,
    Offline,
    NoStoreIdentity,
    /// Sync mode is `offline`.
    Disabled,
}

/// Reports of both phases of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub pull: PullReport,
    pub push: DrainReport,
}

/// Result of a sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncSummary),
    Skipped(SkipReason),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

/// Snapshot of the agent for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub state: SyncState,
    pub online: bool,
    pub store_id: Option<String>,
    /// Queued outbox items.
    pub pending_count: i64,
    /// Records flagged `conflict`.
    pub conflict_count: i64,
    /// Last successful full sync (RFC 3339).
    pub last_sync: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
enum AgentCommand {
    Network(NetworkEvent),
    SyncNow,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Observer for status events (implemented by the UI integration).
pub trait SyncEventEmitter: Send + Sync {
    fn emit_status(&self, event: &SyncEvent);
}

impl<F> SyncEventEmitter for F
where
    F: Fn(&SyncEvent) + Send + Sync,
{
    fn emit_status(&self, event: &SyncEvent) {
        self(event)
    }
}

// =============================================================================
// Single-Flight Guard
// =============================================================================

/// Holds the "pass running" flag; released on drop.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard { flag })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

#[derive(Debug, Default)]
struct AgentState {
    state: SyncState,
    store_id: Option<String>,
    last_error: Option<String>,
}

/// Main sync agent.
pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    remote: Arc<dyn RemoteClient>,
    drainer: PushDrainer,
    reconciler: PullReconciler,

    state: Mutex<AgentState>,
    syncing: AtomicBool,
    online: AtomicBool,

    listeners: RwLock<Vec<Arc<dyn SyncEventEmitter>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncAgent {
    /// Creates an agent. It starts `offline` until told otherwise.
    pub fn new(config: SyncConfig, db: Database, remote: Arc<dyn RemoteClient>) -> Self {
        let drainer = PushDrainer::new(db.clone(), remote.clone(), config.sync.max_attempts);
        let reconciler = PullReconciler::new(db.clone(), remote.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = AgentState {
            store_id: config.store.id.clone(),
            ..Default::default()
        };

        SyncAgent {
            config: Arc::new(config),
            db,
            remote,
            drainer,
            reconciler,
            state: Mutex::new(state),
            syncing: AtomicBool::new(false),
            online: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Registers a status observer.
    pub fn add_listener(&self, listener: Arc<dyn SyncEventEmitter>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Subscribes to the status broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SyncState {
        self.lock_state().state
    }

    pub fn store_id(&self) -> Option<String> {
        self.lock_state().store_id.clone()
    }

    /// Returns the current status, including queue and conflict counts.
    pub async fn status(&self) -> SyncResult<AgentStatus> {
        let pending_count = self.db.outbox().count_pending().await?;
        let conflict_count = self
            .db
            .records()
            .count_by_status(SyncStatus::Conflict)
            .await?;
        let last_sync = self.db.meta().checkpoint().await?.map(|at| at.to_rfc3339());

        let state = self.lock_state();
        Ok(AgentStatus {
            state: state.state,
            online: self.is_online(),
            store_id: state.store_id.clone(),
            pending_count,
            conflict_count,
            last_sync,
            last_error: state.last_error.clone(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Resolves the store identity.
    ///
    /// ## Resolution Order
    /// 1. `store.id` from config
    /// 2. The remote, retried with exponential backoff
    /// 3. The identity cached by a previous run
    ///
    /// ## Returns
    /// The identity, or `None` when none of the sources produced one.
    pub async fn initialize(&self) -> SyncResult<Option<String>> {
        if let Some(id) = self.config.store_id() {
            let id = id.to_string();
            self.db.meta().set_store_identity(&id).await?;
            self.lock_state().store_id = Some(id.clone());
            info!(store_id = %id, "Using configured store identity");
            return Ok(Some(id));
        }

        if !self.config.is_sync_enabled() {
            let cached = self.db.meta().store_identity().await?;
            self.lock_state().store_id = cached.clone();
            return Ok(cached);
        }

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.sync.initial_backoff_ms))
            .with_max_elapsed_time(Some(Duration::from_secs(
                self.config.sync.identity_timeout_secs,
            )))
            .build();

        let remote = &self.remote;
        let resolved = backoff::future::retry(policy, || async move {
            remote.resolve_store_identity().await.map_err(|e| {
                if e.is_retryable() {
                    debug!(error = %e, "Store identity lookup failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await;

        let id = match resolved {
            Ok(id) => {
                self.db.meta().set_store_identity(&id).await?;
                info!(store_id = %id, "Store identity resolved");
                Some(id)
            }
            Err(e) => {
                let cached = self.db.meta().store_identity().await?;
                warn!(error = %e, cached = ?cached, "Could not resolve store identity, using cache");
                cached
            }
        };

        self.lock_state().store_id = id.clone();
        Ok(id)
    }

    /// One unretried identity lookup, used on reconnect.
    async fn resolve_identity_once(&self) -> SyncResult<Option<String>> {
        match self.remote.resolve_store_identity().await {
            Ok(id) => {
                self.db.meta().set_store_identity(&id).await?;
                self.lock_state().store_id = Some(id.clone());
                info!(store_id = %id, "Store identity resolved on reconnect");
                Ok(Some(id))
            }
            Err(e) => {
                debug!(error = %e, "Store identity still unknown");
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Applies a connectivity change.
    ///
    /// `Online` runs the reconnect fast path (push then pull) when a store
    /// identity is known. `Offline` takes effect immediately.
    pub async fn handle_network_event(&self, event: NetworkEvent) -> SyncResult<()> {
        match event {
            NetworkEvent::Offline => {
                self.mark_offline();
                Ok(())
            }
            NetworkEvent::Online => {
                self.online.store(true, Ordering::Release);
                info!("Connection restored");
                self.transition(SyncState::OnlineIdle, "Back online");

                if !self.config.is_sync_enabled() {
                    return Ok(());
                }

                let store_id = match self.store_id() {
                    Some(id) => id,
                    None => match self.resolve_identity_once().await? {
                        Some(id) => id,
                        None => return Ok(()),
                    },
                };

                self.fast_sync(&store_id).await.map(|_| ())
            }
        }
    }

    /// Enters `offline` and blocks new passes. A running pass is not cancelled.
    pub fn mark_offline(&self) {
        self.online.store(false, Ordering::Release);
        info!("Connection lost, working offline");
        self.transition(SyncState::Offline, "Working offline");
    }

    // =========================================================================
    // Sync Passes
    // =========================================================================

    /// Runs a full sync: pull, then push, then advance the checkpoint.
    ///
    /// ## Returns
    /// * `Ok(Completed)` - both phases succeeded, checkpoint advanced
    /// * `Ok(Skipped)` - disabled, offline, no identity, or a pass is running
    /// * `Err` - a phase failed; state is `error`, checkpoint unchanged
    pub async fn full_sync(&self) -> SyncResult<SyncOutcome> {
        if !self.config.is_sync_enabled() {
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        }
        if !self.is_online() {
            debug!("Offline, skipping full sync");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        let Some(store_id) = self.store_id() else {
            debug!("No store identity, skipping full sync");
            return Ok(SyncOutcome::Skipped(SkipReason::NoStoreIdentity));
        };
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            debug!("Sync already in progress");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
        };

        let started = Utc::now();
        info!(store_id = %store_id, "Full sync starting");
        self.transition(SyncState::Syncing, "Syncing data...");

        let result = async {
            let since = self.db.meta().checkpoint().await?;
            let pull = self.reconciler.pull(&store_id, since).await?;
            let push = self.drainer.drain(&store_id).await?;
            self.db.meta().set_checkpoint(started).await?;
            Ok(SyncSummary { pull, push })
        }
        .await;

        self.complete_pass(result, "All data synced")
    }

    /// Reconnect fast path: push queued writes first, then pull.
    async fn fast_sync(&self, store_id: &str) -> SyncResult<SyncOutcome> {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            debug!("Sync already in progress, skipping reconnect push");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
        };

        self.transition(SyncState::Syncing, "Uploading offline changes...");

        let result = async {
            let push = self.drainer.drain(store_id).await?;
            let since = self.db.meta().checkpoint().await?;
            let pull = self.reconciler.pull(store_id, since).await?;
            Ok(SyncSummary { pull, push })
        }
        .await;

        self.complete_pass(result, "Offline changes uploaded")
    }

    fn complete_pass(
        &self,
        result: SyncResult<SyncSummary>,
        message: &str,
    ) -> SyncResult<SyncOutcome> {
        match result {
            Ok(summary) => {
                info!(
                    pulled = summary.pull.fetched(),
                    pushed = summary.push.succeeded,
                    failed = summary.push.failed,
                    conflicted = summary.pull.conflicted() + summary.push.conflicted,
                    "Sync pass finished"
                );
                self.lock_state().last_error = None;
                self.finish(SyncState::Synced, message);
                Ok(SyncOutcome::Completed(summary))
            }
            Err(e) => {
                error!(error = %e, "Sync pass failed");
                self.lock_state().last_error = Some(e.to_string());
                self.finish(SyncState::Error, SYNC_FAILED_MESSAGE);
                Err(e)
            }
        }
    }

    /// Drains after a local write if the agent can. Never fails the write.
    async fn push_opportunistically(&self) {
        if !self.config.sync.push_on_write || !self.config.is_sync_enabled() || !self.is_online()
        {
            return;
        }
        let Some(store_id) = self.store_id() else {
            return;
        };
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            debug!("Sync pass running, write stays queued");
            return;
        };

        match self.drainer.drain(&store_id).await {
            Ok(report) => debug!(succeeded = report.succeeded, failed = report.failed, "Pushed local write"),
            Err(e) => warn!(error = %e, "Push after write failed, will retry on next sync"),
        }
    }

    // =========================================================================
    // Application Write Path
    // =========================================================================

    /// Saves a record locally and queues it for upload.
    ///
    /// ## Arguments
    /// * `table` - Logical table
    /// * `fields` - User-domain fields (camelCase). Engine-owned keys are ignored.
    /// * `id` - Existing local id, or `None` to create a record
    ///
    /// ## Returns
    /// The stored record. A record already in conflict stays in conflict.
    pub async fn save(
        &self,
        table: TableKind,
        mut fields: Map<String, Value>,
        id: Option<String>,
    ) -> SyncResult<Record> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let records = self.db.records();
        let existing = records.get(table, &id).await?;

        for key in ENGINE_FIELDS {
            fields.remove(key);
        }
        if table.is_settings() {
            fields.insert(SETTINGS_KEY.to_string(), Value::String(id.clone()));
        }

        let record = Record {
            remote_id: existing.as_ref().and_then(|r| r.remote_id.clone()),
            sync_status: match &existing {
                Some(r) if r.is_conflict() => SyncStatus::Conflict,
                _ => SyncStatus::Pending,
            },
            last_modified: Some(Utc::now()),
            version: existing.as_ref().map_or(UNSYNCED_VERSION, |r| r.version),
            fields,
            id,
        };

        self.db
            .outbox()
            .write_and_enqueue(table, OutboxOperation::Upsert, &record)
            .await?;
        debug!(table = %table, id = %record.id, "Record saved");

        self.push_opportunistically().await;
        Ok(record)
    }

    /// Deletes a record locally and queues the remote soft delete.
    ///
    /// ## Returns
    /// `false` if no such record existed.
    pub async fn delete(&self, table: TableKind, id: &str) -> SyncResult<bool> {
        let records = self.db.records();
        let Some(existing) = records.get(table, id).await? else {
            return Ok(false);
        };

        self.db
            .outbox()
            .write_and_enqueue(table, OutboxOperation::Delete, &existing)
            .await?;
        debug!(table = %table, id = %id, remote_id = ?existing.remote_id, "Record deleted");

        self.push_opportunistically().await;
        Ok(true)
    }

    /// Puts a conflicted record back in the push queue, keeping local fields.
    ///
    /// ## Returns
    /// `false` if the record doesn't exist or isn't in conflict.
    pub async fn retry_conflicted(&self, table: TableKind, id: &str) -> SyncResult<bool> {
        let records = self.db.records();
        if !records.release_conflict(table, id).await? {
            return Ok(false);
        }
        let record = records.get_required(table, id).await?;

        let outbox = self.db.outbox();
        if let Some(remote_id) = record.remote_id.as_deref() {
            outbox.backfill_remote_id(table, id, remote_id).await?;
        }
        if !outbox.has_pending_for(table, id, None).await? {
            outbox
                .enqueue(table, OutboxOperation::Upsert, id, &record)
                .await?;
        }
        info!(table = %table, id = %id, "Conflict released for retry");

        self.push_opportunistically().await;
        Ok(true)
    }

    // =========================================================================
    // State & Events
    // =========================================================================

    fn transition(&self, state: SyncState, message: &str) {
        self.lock_state().state = state;
        self.emit(SyncEvent::new(state, message));
    }

    /// Like `transition`, but leaves `offline` in place.
    fn finish(&self, state: SyncState, message: &str) {
        {
            let mut current = self.lock_state();
            if !self.is_online() {
                debug!(%state, "Went offline during the pass, keeping offline state");
                return;
            }
            current.state = state;
        }
        self.emit(SyncEvent::new(state, message));
    }

    fn emit(&self, event: SyncEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener.emit_status(&event);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Starts the background loop.
    pub fn spawn(self: Arc<Self>) -> SyncAgentHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(self.clone().run(command_rx, shutdown_rx));

        SyncAgentHandle {
            agent: self,
            command_tx,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<AgentCommand>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let scheduled = self.config.mode().is_scheduled();
        let mut timer = tokio::time::interval(self.config.sync.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        timer.tick().await;

        info!(mode = %self.config.mode(), "Sync agent started");

        loop {
            tokio::select! {
                Some(command) = commands.recv() => match command {
                    AgentCommand::Network(event) => {
                        if let Err(e) = self.handle_network_event(event).await {
                            warn!(?event, error = %e, "Reconnect sync failed");
                        }
                    }
                    AgentCommand::SyncNow => self.log_outcome(self.full_sync().await),
                },

                _ = timer.tick(), if scheduled => {
                    self.log_outcome(self.full_sync().await);
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync agent received shutdown");
                    break;
                }
            }
        }

        info!("Sync agent stopped");
    }

    fn log_outcome(&self, outcome: SyncResult<SyncOutcome>) {
        match outcome {
            Ok(SyncOutcome::Completed(_)) => {}
            Ok(SyncOutcome::Skipped(reason)) => debug!(?reason, "Sync skipped"),
            Err(e) => warn!(error = %e, "Scheduled sync failed"),
        }
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running [`SyncAgent`].
pub struct SyncAgentHandle {
    agent: Arc<SyncAgent>,
    command_tx: mpsc::Sender<AgentCommand>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncAgentHandle {
    /// Reports regained connectivity; the loop runs the fast path.
    pub async fn notify_online(&self) -> SyncResult<()> {
        self.send(AgentCommand::Network(NetworkEvent::Online)).await
    }

    /// Reports lost connectivity. Applied immediately, not queued.
    pub fn notify_offline(&self) {
        self.agent.mark_offline();
    }

    /// Requests a full sync.
    pub async fn request_sync(&self) -> SyncResult<()> {
        self.send(AgentCommand::SyncNow).await
    }

    pub async fn status(&self) -> SyncResult<AgentStatus> {
        self.agent.status().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.agent.subscribe()
    }

    /// The agent, for the write path (`save`, `delete`, ...).
    pub fn agent(&self) -> &Arc<SyncAgent> {
        &self.agent
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Sync agent task ended abnormally");
        }
    }

    async fn send(&self, command: AgentCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| SyncError::ChannelError(e.to_string()))
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a [`SyncAgent`].
pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Database>,
    remote: Option<Arc<dyn RemoteClient>>,
    listeners: Vec<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            remote: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn SyncEventEmitter>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Builds the agent.
    ///
    /// ## Errors
    /// `InvalidConfig` when the database or remote client is missing.
    pub fn build(self) -> SyncResult<SyncAgent> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote client required".into()))?;

        let agent = SyncAgent::new(self.config, db, remote);
        for listener in self.listeners {
            agent.add_listener(listener);
        }
        Ok(agent)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
