//! # seed-sync: Sync Engine for Seed Express
//!
//! Keeps reference tables consistent with an upstream seed file while doing
//! the minimum number of writes.
//!
//! ## One Sync Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine::sync("colors")                       │
//! │                                                                         │
//! │  read source ──► duplicate ids? ──────────────────────────► Err        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  truncate? ── yes ─► empty table + ledger                              │
//! │  force?    ── yes ─► disable record cache                              │
//! │  neither   ── digest + schema unchanged ─────────────────► skipped     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  delete ids missing from the source (one transaction)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  reconcile ──► insert chunks ──► update chunks (changed rows only)     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ledger upkeep ──► post-validation ──► cascade to parent               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  no errors? commit table digest ──► ok        otherwise ──► error      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - `SyncEngine`, options and the run report
//! - [`writer`] - Chunked insert / update with per-record failures
//! - [`ledger`] - Digest ledger upkeep after the writes
//! - [`cascade`] - Parent table invalidation
//! - [`source`] - Record sources (JSON, JSON Lines, in-memory)
//! - [`registry`] - Entity descriptors and validators
//! - [`observer`] - Phase hooks
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Run-level errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seed_sync::{EntityRegistry, EntityDescriptor, FileSource, SyncEngine, SyncOptions};
//!
//! let registry = EntityRegistry::new().with(EntityDescriptor::new("colors"));
//! let engine = SyncEngine::new(db, registry);
//!
//! let report = engine
//!     .sync("colors", &FileSource::new("seeds/colors.json"), &SyncOptions::default())
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod cascade;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod observer;
pub mod registry;
pub mod source;
pub mod writer;

pub use cascade::CascadeInvalidator;
pub use config::{SeedConfig, TableConfig};
pub use engine::{CascadeReport, SyncEngine, SyncOptions, SyncOutcome, SyncReport};
pub use error::{SyncError, SyncResult};
pub use ledger::{LedgerMaintainer, LedgerWrites};
pub use observer::{HookPoint, Progress, SyncEvent, SyncObserver, SyncPhase, TracingObserver};
pub use registry::{
    singularize, EntityDescriptor, EntityRegistry, EntityValidator, ParentRelation,
    SchemaValidator, SyncedIds,
};
pub use source::{FileSource, MemorySource, RecordSource, SourceData, SourceFormat};
pub use writer::{BatchWriter, InsertOutcome, RecordFailure, UpdateOutcome};
