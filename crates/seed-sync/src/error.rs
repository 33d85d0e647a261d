//! # Sync Error Types
//!
//! Run-level errors. Per-record problems are not errors: they are collected
//! into the report and turn the run result into `error` without aborting.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Source      │  │     Integrity           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  SourceRead     │  │  Core(DuplicateIds)     │ │
//! │  │  ConfigLoad     │  │  InvalidSource  │  │  IntegrityCount         │ │
//! │  │  ConfigSave     │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Database     │  │    Registry     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Database(..)   │  │  UnknownTable   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use seed_core::CoreError;
use seed_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a sync run or a CLI command.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Source Errors
    // =========================================================================
    /// The source could not be read.
    #[error("Failed to read source {source_name}: {message}")]
    SourceReadFailed { source_name: String, message: String },

    /// The source was read but its content is not a record list.
    #[error("Invalid source {source_name}: {message}")]
    InvalidSource { source_name: String, message: String },

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Records cannot be reconciled (duplicate or missing ids).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Row count after the insert phase does not match the inserted rows.
    ///
    /// ## When This Occurs
    /// - Another process wrote to the table during the run
    /// - Rows exist that the ledger does not know about
    #[error(
        "Row count of '{table}' is {actual} after inserting, expected {expected}. \
         Run again in truncate mode to rebuild the table."
    )]
    IntegrityCount {
        table: String,
        expected: i64,
        actual: i64,
    },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Table is not registered with the engine.
    #[error("Table '{0}' is not registered")]
    UnknownTable(String),

    // =========================================================================
    // Database / Serialization Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Failed to serialize a report.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::UnknownTable(_)
        )
    }

    /// Returns true if the run was aborted because the data or the table is
    /// inconsistent, as opposed to an infrastructure failure.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            SyncError::Core(CoreError::DuplicateIds { .. }) | SyncError::IntegrityCount { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_integrity_count_recommends_truncate() {
        let err = SyncError::IntegrityCount {
            table: "colors".into(),
            expected: 5,
            actual: 4,
        };
        assert!(err.to_string().contains("truncate mode"));
        assert!(err.is_integrity_error());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_core_errors_pass_through() {
        let mut ids = BTreeMap::new();
        ids.insert(1, 2);
        let err: SyncError = CoreError::DuplicateIds { ids }.into();
        assert!(err.is_integrity_error());
        assert!(err.to_string().starts_with("There are duplicate ids"));
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidConfig("x".into()).is_config_error());
        assert!(SyncError::UnknownTable("x".into()).is_config_error());
        assert!(!SyncError::Database(DbError::PoolExhausted).is_config_error());
    }
}
