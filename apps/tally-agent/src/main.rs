//! # Tally Sync Agent
//!
//! Headless process that keeps one terminal's local store in sync.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          tally-agent                                    │
//! │                                                                         │
//! │  SyncConfig::load ──► Database::new ──► HttpRemoteClient::new          │
//! │                                               │                         │
//! │                         SyncAgent::initialize (store identity)          │
//! │                                               │                         │
//! │                         SyncAgent::spawn ──► SyncAgentHandle            │
//! │                                               │                         │
//! │  loop:  probe tick  ── reachability changed ──► notify_online/offline  │
//! │         status event ──► log                                           │
//! │         Ctrl+C / SIGTERM ──► shutdown                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `tally-agent [path/to/sync.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_db::{Database, DbConfig};
use tally_sync::{HttpRemoteClient, RemoteClient, SyncAgent, SyncConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load(config_path)?;
    info!(
        mode = %config.mode(),
        store_id = ?config.store_id(),
        remote = ?config.remote.base_url,
        "Configuration loaded"
    );

    if !config.is_sync_enabled() {
        info!("Sync mode is offline, nothing to do");
        return Ok(());
    }

    let db = Database::new(DbConfig::new(config.database_path())).await?;
    if !db.health_check().await {
        error!(path = ?config.database_path(), "Local store is not answering queries");
        return Err("local store health check failed".into());
    }
    let remote = Arc::new(HttpRemoteClient::new(&config.remote)?);
    let probe_interval = config.remote.probe_interval();

    let agent = Arc::new(SyncAgent::new(config, db.clone(), remote.clone()));
    if agent.initialize().await?.is_none() {
        warn!("No store identity yet; syncing starts once the remote answers");
    }

    let handle = agent.spawn();
    let mut events = handle.subscribe();

    let mut probe = tokio::time::interval(probe_interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut online = false;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = probe.tick() => {
                let reachable = remote.probe().await;
                if reachable != online {
                    online = reachable;
                    if reachable {
                        handle.notify_online().await?;
                    } else {
                        handle.notify_offline();
                    }
                }
            }

            event = events.recv() => match event {
                Ok(event) => info!(status = %event.status, message = %event.message, "Sync status"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Status events dropped"),
                Err(RecvError::Closed) => break,
            },

            _ = &mut shutdown => break,
        }
    }

    match handle.status().await {
        Ok(status) => info!(
            pending = status.pending_count,
            conflicts = status.conflict_count,
            last_sync = ?status.last_sync,
            "Final sync status"
        ),
        Err(e) => warn!(error = %e, "Could not read final status"),
    }

    handle.shutdown().await;
    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tally=trace` - Show trace for tally crates only
/// - Default: INFO, with DEBUG for tally crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync agent");
}
