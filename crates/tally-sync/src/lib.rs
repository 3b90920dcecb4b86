//! # tally-sync: Sync Engine for Tally
//!
//! Keeps the local store and the remote service convergent while the
//! terminal moves between online and offline.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  Connectivity state, single-flight passes, write path, events   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  PushDrainer   │  │ PullReconciler │  │  RemoteClient          │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Drains the     │  │ Fetches remote │  │ HttpRemoteClient:      │    │
//! │  │ outbox, retry  │  │ changes, merge │  │ reqwest over a         │    │
//! │  │ ceiling ⇒      │  │ rules, conflict│  │ PostgREST-style API    │    │
//! │  │ conflict       │  │ detection      │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS EVENTS (to the UI): { status, message }                        │
//! │  status ∈ online | offline | syncing | synced | error                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` orchestrator, handle and builder
//! - [`config`] - Sync configuration (mode, remote, store, database)
//! - [`error`] - Sync error types
//! - [`push`] - Outbox drainer
//! - [`pull`] - Pull/merge reconciler
//! - [`remote`] - The remote service seam
//! - [`http`] - REST implementation of the seam
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_db::{Database, DbConfig};
//! use tally_sync::{HttpRemoteClient, SyncAgent, SyncConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let remote = Arc::new(HttpRemoteClient::new(&config.remote)?);
//!
//! let agent = Arc::new(SyncAgent::new(config, db, remote));
//! agent.initialize().await?;
//! let handle = agent.spawn();
//! handle.notify_online().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod pull;
pub mod push;
pub mod remote;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    AgentStatus, NetworkEvent, SkipReason, SyncAgent, SyncAgentBuilder, SyncAgentHandle,
    SyncEventEmitter, SyncOutcome, SyncSummary,
};
pub use config::{SyncConfig, SyncMode};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemoteClient;
pub use pull::{PullReconciler, PullReport, TableReport};
pub use push::{DrainReport, PushDrainer};
pub use remote::RemoteClient;
