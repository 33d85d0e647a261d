//! # seed-db: Persistence Layer for Seed Express
//!
//! SQLite storage for the sync engine: the bookkeeping tables (table state
//! and per-record digest ledger) and runtime access to arbitrary target
//! tables.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Seed Express Data Flow                            │
//! │                                                                         │
//! │  SyncEngine::sync("colors", source, options)   (seed-sync)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     seed-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ TableStateRepo     │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ DigestLedgerRepo   │  │ seed_tables│  │   │
//! │  │   │               │    │ TargetTableRepo    │  │ seed_records│ │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite database (target tables owned by the host app)         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Table state, digest ledger and target table access
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seed_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("seed.db")).await?;
//!
//! let state = db.table_states().get_or_create("colors").await?;
//! let digests = db.ledger().digests(state.id).await?;
//! let colors = db.target("colors")?;
//! let schema = colors.schema().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::ledger::DigestLedgerRepository;
pub use repository::table_state::{TableState, TableStateRepository};
pub use repository::target::TargetTableRepository;
