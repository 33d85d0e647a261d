//! # Validation
//!
//! Per-record field errors, table-level violations and the built-in
//! not-null rule.
//!
//! ## Where Problems Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Conversion (convert.rs)                                      │
//! │  ├── Unknown column                                                    │
//! │  └── Value not coercible to the column type                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Row rules (THIS MODULE + EntityValidator in seed-sync)       │
//! │  ├── NOT NULL column without default left empty                        │
//! │  └── Custom per-table rules                                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Post-sync (EntityValidator::after_sync_validate)             │
//! │  └── Table-wide invariants → Violation                                 │
//! │                                                                         │
//! │  Layers 1-2 skip the record, layer 3 marks the run; none abort.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::types::{ColumnType, RecordId, Row, TableSchema};

/// A problem with one field of one record.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldError {
    /// NOT NULL column without a default has no value.
    #[error("{column} must be set")]
    Required { column: String },

    /// Attribute does not exist in the target table.
    #[error("{column} is not a column of the target table")]
    UnknownColumn { column: String },

    /// Value cannot be converted to the column type.
    #[error("{column} expects {expected}: {reason}")]
    InvalidValue {
        column: String,
        expected: ColumnType,
        reason: String,
    },

    /// Rule supplied by an entity validator.
    #[error("{column} {message}")]
    Rule { column: String, message: String },
}

impl FieldError {
    /// Creates a custom rule error.
    pub fn rule(column: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError::Rule {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Column the error refers to.
    pub fn column(&self) -> &str {
        match self {
            FieldError::Required { column }
            | FieldError::UnknownColumn { column }
            | FieldError::InvalidValue { column, .. }
            | FieldError::Rule { column, .. } => column,
        }
    }
}

/// A table-level problem reported after the writes of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Offending record, when the problem is tied to one.
    pub record_id: Option<RecordId>,
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Violation {
            record_id: None,
            message: message.into(),
        }
    }

    pub fn for_record(record_id: RecordId, message: impl Into<String>) -> Self {
        Violation {
            record_id: Some(record_id),
            message: message.into(),
        }
    }
}

/// Flags NOT NULL, non-key columns without a default that are null or absent.
///
/// ## Example
/// ```rust
/// use std::collections::BTreeMap;
/// use seed_core::types::{CellValue, ColumnInfo, ColumnType, TableSchema};
/// use seed_core::validation::not_null_without_default;
///
/// let schema = TableSchema {
///     table: "colors".into(),
///     columns: vec![ColumnInfo {
///         name: "name".into(),
///         declared_type: "TEXT".into(),
///         column_type: ColumnType::Text,
///         nullable: false,
///         default: None,
///         primary_key: false,
///     }],
/// };
///
/// let mut row = BTreeMap::new();
/// row.insert("name".to_string(), CellValue::Null);
/// assert_eq!(not_null_without_default(&schema, &row).len(), 1);
/// ```
pub fn not_null_without_default(schema: &TableSchema, row: &Row) -> Vec<FieldError> {
    schema
        .columns
        .iter()
        .filter(|c| !c.primary_key && !c.nullable && c.default.is_none())
        .filter(|c| row.get(&c.name).map_or(true, |v| v.is_null()))
        .map(|c| FieldError::Required {
            column: c.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellValue, ColumnDefault, ColumnInfo};

    fn schema() -> TableSchema {
        let col = |name: &str, nullable: bool, default: Option<ColumnDefault>, pk: bool| ColumnInfo {
            name: name.into(),
            declared_type: "TEXT".into(),
            column_type: ColumnType::Text,
            nullable,
            default,
            primary_key: pk,
        };
        TableSchema {
            table: "items".into(),
            columns: vec![
                col("id", false, None, true),
                col("name", false, None, false),
                col("code", false, Some(ColumnDefault::Value(CellValue::Text("x".into()))), false),
                col("note", true, None, false),
            ],
        }
    }

    #[test]
    fn test_not_null_rule_flags_missing_and_null() {
        let mut row = Row::new();
        row.insert("id".into(), CellValue::Integer(1));
        assert_eq!(
            not_null_without_default(&schema(), &row),
            vec![FieldError::Required { column: "name".into() }]
        );

        row.insert("name".into(), CellValue::Null);
        assert_eq!(not_null_without_default(&schema(), &row).len(), 1);

        row.insert("name".into(), CellValue::Text("ok".into()));
        assert!(not_null_without_default(&schema(), &row).is_empty());
    }

    #[test]
    fn test_field_error_display() {
        let err = FieldError::InvalidValue {
            column: "price".into(),
            expected: ColumnType::Integer,
            reason: "'abc' is not a number".into(),
        };
        assert_eq!(err.to_string(), "price expects integer: 'abc' is not a number");
        assert_eq!(err.column(), "price");
    }
}
