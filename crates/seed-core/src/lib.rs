//! # seed-core: Pure Synchronization Logic for Seed Express
//!
//! This crate holds everything a sync run decides *before* it touches the
//! database: content digests, the insert/update/no-op classification, column
//! value conversion and field rules. Every function is deterministic and free
//! of I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Seed Express Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 seed-sync (SyncEngine, CLI)                     │   │
//! │  │    read source ──► reconcile ──► write batches ──► ledger       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ seed-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  digest   │  │ reconcile │  │  convert  │  │ validation│  │   │
//! │  │   │  SHA-256  │  │ insert /  │  │ coercion  │  │ not-null  │  │   │
//! │  │   │  msgpack  │  │ update    │  │ NVL table │  │ rules     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • PURE FUNCTIONS                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    seed-db (Database Layer)                     │   │
//! │  │          SQLite queries, migrations, ledger repositories        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Records, digests, cell values and table schemas
//! - [`digest`] - Record, table and schema digests
//! - [`reconcile`] - Duplicate detection, delete set, insert/update split
//! - [`convert`] - Column-level value conversion and NVL substitution
//! - [`validation`] - Field errors, violations and built-in rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use std::collections::{HashMap, HashSet};
//! use seed_core::{reconcile, SourceRecord};
//!
//! let incoming = vec![
//!     SourceRecord::from_value(0, serde_json::json!({"id": 1, "name": "a"})).unwrap(),
//!     SourceRecord::from_value(1, serde_json::json!({"id": 2, "name": "b"})).unwrap(),
//! ];
//!
//! let plan = reconcile(&HashSet::new(), &HashMap::new(), &incoming).unwrap();
//! assert_eq!(plan.to_insert.len(), 2);
//! assert!(plan.to_update.is_empty());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod convert;
pub mod digest;
pub mod error;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use convert::{ConversionOptions, NvlTable, ValueConverter};
pub use digest::{record_digest, schema_digest, table_digest};
pub use error::{CoreError, CoreResult};
pub use reconcile::{deletion_set, duplicate_ids, ensure_unique_ids, reconcile, Reconciliation};
pub use types::*;
pub use validation::{FieldError, Violation};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Attribute that carries the reconciliation key of every record.
pub const ID_COLUMN: &str = "id";

/// Default number of records written per transaction.
///
/// Large enough to amortize transaction overhead, small enough to keep
/// lock time and memory bounded on tables with hundreds of thousands of rows.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
