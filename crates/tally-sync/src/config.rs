//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_SYNC_MODE=manual                                             │
//! │     TALLY_REMOTE_URL=https://example.supabase.co                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally/sync.toml (Linux)                                  │
//! │     ~/Library/Application Support/com.tally.tally/sync.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Auto, 60s interval, 5 push attempts                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [store]
//! id = "4f1c..."          # optional; resolved from the remote when absent
//! name = "Main Street"
//!
//! [remote]
//! base_url = "https://example.supabase.co"
//! api_key = "..."
//! request_timeout_secs = 15
//!
//! [sync]
//! mode = "auto"           # auto | manual | offline
//! interval_secs = 60
//! max_attempts = 5
//! push_on_write = true
//!
//! [database]
//! path = "/var/lib/tally/tally.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use tally_core::DEFAULT_MAX_PUSH_ATTEMPTS;

// =============================================================================
// Sync Mode
// =============================================================================

/// How the agent schedules full syncs.
///
/// ## Mode Selection
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        Sync Mode Behavior                               │
/// │                                                                         │
/// │  AUTO (Default)                                                        │
/// │  • Full sync on the interval timer                                     │
/// │  • Fast path (push then pull) on every reconnect                       │
/// │                                                                         │
/// │  MANUAL                                                                │
/// │  • No timer; full sync only when requested                             │
/// │  • Reconnect fast path still runs                                      │
/// │                                                                         │
/// │  OFFLINE                                                               │
/// │  • Sync disabled completely; writes still queue locally                │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Auto,

    Manual,

    /// Sync disabled - local operations only.
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    /// Returns true if the interval timer drives full syncs.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SyncMode::Auto),
            "manual" | "on_demand" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// The store (tenant) this terminal belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Remote store identifier. When absent it is resolved from the remote
    /// at startup and cached locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable store name.
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Connection settings for the remote REST service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the service, e.g. `https://project.supabase.co`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key sent as `apikey` and bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Interval between connectivity probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Rows requested per fetch page. Keep at or below the server's row cap.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_request_timeout() -> u64 {
    15
}

fn default_probe_interval() -> u64 {
    10
}

fn default_page_size() -> usize {
    1000
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            probe_interval_secs: default_probe_interval(),
            page_size: default_page_size(),
        }
    }
}

impl RemoteSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Interval between scheduled full syncs (seconds). Auto mode only.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Failed pushes after which a record is flagged as conflicted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Drain the outbox right after every local write when online.
    #[serde(default = "default_true")]
    pub push_on_write: bool,

    /// Initial backoff (milliseconds) when resolving the store identity.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Give up resolving the store identity after this long (seconds).
    #[serde(default = "default_identity_timeout")]
    pub identity_timeout_secs: u64,
}

fn default_interval() -> u64 {
    60
}
fn default_max_attempts() -> i64 {
    DEFAULT_MAX_PUSH_ATTEMPTS
}
fn default_true() -> bool {
    true
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_identity_timeout() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
            push_on_write: default_true(),
            initial_backoff_ms: default_initial_backoff(),
            identity_timeout_secs: default_identity_timeout(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Where the local store lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref raw) = self.remote.base_url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Remote URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.sync.mode.is_sync_enabled() && self.remote.base_url.is_none() {
            return Err(SyncError::InvalidConfig(
                "remote.base_url is required unless sync.mode is offline".into(),
            ));
        }

        if self.sync.max_attempts < 1 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }

        if self.sync.mode.is_scheduled() && self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval_secs must be greater than 0".into(),
            ));
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("TALLY_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Ok(url) = std::env::var("TALLY_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.base_url = Some(url);
        }

        if let Ok(key) = std::env::var("TALLY_API_KEY") {
            self.remote.api_key = Some(key);
        }

        if let Ok(id) = std::env::var("TALLY_STORE_ID") {
            self.store.id = Some(id);
        }

        if let Ok(secs) = std::env::var("TALLY_SYNC_INTERVAL") {
            if let Ok(s) = secs.parse::<u64>() {
                self.sync.interval_secs = s;
            }
        }

        if let Ok(path) = std::env::var("TALLY_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "tally")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Returns the default database path in the platform data directory.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "tally")
            .map(|dirs| dirs.data_dir().join("tally.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the configured store ID, if any.
    pub fn store_id(&self) -> Option<&str> {
        self.store.id.as_deref()
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    /// Returns true if sync is enabled.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    /// Returns the database path: configured, platform default, or `./tally.db`.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(Self::default_database_path)
            .unwrap_or_else(|| PathBuf::from("tally.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.remote.base_url = Some("https://example.supabase.co".to_string());
        config
    }

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("MANUAL".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert_eq!("offline".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert_eq!("disabled".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("primary".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync.mode, SyncMode::Auto);
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.interval_secs, 60);
        assert!(config.sync.push_on_write);
        assert!(config.store_id().is_none());
    }

    #[test]
    fn test_config_validation() {
        // Auto mode without a remote is rejected
        assert!(SyncConfig::default().validate().is_err());

        let mut config = online_config();
        assert!(config.validate().is_ok());

        config.remote.base_url = Some("ftp://example.com".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.remote.base_url = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        let mut config = online_config();
        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());

        // Offline mode needs nothing
        let mut config = SyncConfig::default();
        config.sync.mode = SyncMode::Offline;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_flags() {
        assert!(SyncMode::Auto.is_scheduled());
        assert!(!SyncMode::Manual.is_scheduled());
        assert!(SyncMode::Manual.is_sync_enabled());
        assert!(!SyncMode::Offline.is_sync_enabled());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = online_config();
        config.store.id = Some("store-1".into());
        config.sync.mode = SyncMode::Manual;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[remote]"));
        assert!(toml_str.contains("[sync]"));

        let parsed: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.store_id(), Some("store-1"));
        assert_eq!(parsed.mode(), SyncMode::Manual);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: SyncConfig = toml::from_str(
            r#"
            [remote]
            base_url = "http://localhost:54321"

            [sync]
            mode = "manual"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.sync.max_attempts, 5);
        assert_eq!(parsed.remote.request_timeout_secs, 15);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("tally-config-{}", std::process::id()))
            .join("sync.toml");

        let mut config = online_config();
        config.sync.interval_secs = 120;
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.sync.interval_secs, 120);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
