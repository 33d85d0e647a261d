//! # Error Types
//!
//! Domain-specific error types for seed-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  seed-core errors (this file)                                          │
//! │  └── CoreError        - Source data that cannot be reconciled          │
//! │                                                                         │
//! │  seed-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  seed-sync errors                                                      │
//! │  └── SyncError        - Run-level failures surfaced to the caller      │
//! │                                                                         │
//! │  Per-record problems are NOT errors here: they are FieldError values   │
//! │  collected into the run report (see `validation`).                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::RecordId;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while interpreting or classifying source records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The same id appears more than once in the incoming records.
    ///
    /// ## When This Occurs
    /// - Two source rows share an `id` (copy/paste in the seed file)
    ///
    /// Duplicate ids make delete/insert classification undefined, so the run
    /// is aborted before anything is written. `ids` maps each offending id to
    /// the number of times it occurs.
    #[error("There are duplicate ids ({{id => count}}: {ids:?})")]
    DuplicateIds { ids: BTreeMap<RecordId, usize> },

    /// A record has no `id` attribute.
    #[error("Record at position {position} has no id")]
    MissingId { position: usize },

    /// A record's `id` is not an integer.
    #[error("Record at position {position} has an invalid id: {value}")]
    InvalidId { position: usize, value: String },

    /// A source entry is not an attribute mapping.
    #[error("Record at position {position} is not an object")]
    NotAnObject { position: usize },

    /// Canonical encoding of a record failed.
    #[error("Failed to encode record: {0}")]
    Encoding(String),
}

impl From<rmp_serde::encode::Error> for CoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CoreError::Encoding(err.to_string())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
