//! # tally-core: Pure Record Types for Tally Sync
//!
//! This crate holds the data model of the sync engine and the translator
//! between local and remote record shapes. It has zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Application / UI layer                          │   │
//! │  │    save(table, record) ──► delete(...) ──► status events        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tally-sync (SyncAgent)                          │   │
//! │  │    push drainer, pull reconciler, connectivity, scheduling      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────────┐  ┌──────────────────┐                   │   │
//! │  │   │      types       │  │      schema      │                   │   │
//! │  │   │ Record, TableKind│  │ to_remote        │                   │   │
//! │  │   │ OutboxItem, ...  │  │ from_remote      │                   │   │
//! │  │   └──────────────────┘  └──────────────────┘                   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Local Store)                       │   │
//! │  │          SQLite records, outbox queue, sync checkpoint          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records, table kinds, outbox items, status events
//! - [`schema`] - Local ⇄ remote field translation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::{schema, Record, TableKind};
//!
//! let record = Record::new("7").with_field("costPrice", 4.5);
//! let row = schema::to_remote(TableKind::Products, &record);
//!
//! assert_eq!(row["cost_price"], 4.5);
//! assert_eq!(row["local_id"], "7");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod schema;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use schema::{from_remote, to_remote, FieldMap, IncomingRecord};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Push attempts after which a queue item is abandoned and its record
/// flagged as conflicted.
pub const DEFAULT_MAX_PUSH_ATTEMPTS: i64 = 5;

/// Local version of a record that has never been seen by the remote.
pub const UNSYNCED_VERSION: i64 = 0;
