//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  └── CoreError        - Unparseable tags, malformed snapshots          │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Local store failures                           │
//! │                                                                         │
//! │  tally-sync errors (separate crate)                                    │
//! │  └── SyncError        - Remote, config, and store failures             │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → caller                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while interpreting persisted or remote data.
///
/// These never come from the network; they mean a stored tag or snapshot
/// could not be read back into a typed value.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Table name outside the five synced tables.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Sync status tag that is not pending/synced/conflict.
    #[error("Unknown sync status: {0}")]
    UnknownSyncStatus(String),

    /// Outbox operation tag that is not upsert/delete.
    ///
    /// ## When This Occurs
    /// - A queue row was written by a newer build with an extra operation
    /// - Manual edits to the local database
    #[error("Unknown outbox operation: {0}")]
    UnknownOperation(String),

    /// A record snapshot is not a JSON object.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnknownTable("customers".to_string());
        assert_eq!(err.to_string(), "Unknown table: customers");

        let err = CoreError::UnknownOperation("merge".to_string());
        assert_eq!(err.to_string(), "Unknown outbox operation: merge");
    }

    #[test]
    fn test_parse_failures_map_to_core_errors() {
        let err = "customers".parse::<crate::TableKind>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownTable(_)));

        let err = "stale".parse::<crate::SyncStatus>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownSyncStatus(_)));
    }
}
