//! # Domain Types
//!
//! Core types shared by every layer of Seed Express.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SourceRecord   │   │   CellValue     │   │  TableSchema    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (i64)       │   │  Null           │   │  table          │       │
//! │  │  attributes     │   │  Integer / Real │   │  columns[]      │       │
//! │  │  (col → JSON)   │   │  Text / Boolean │   │   name, type    │       │
//! │  └─────────────────┘   │  DateTime       │   │   nullable      │       │
//! │                        └─────────────────┘   │   default       │       │
//! │  ┌─────────────────┐                         └─────────────────┘       │
//! │  │     Digest      │                                                   │
//! │  │  hex SHA-256    │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `SourceRecord` is what the upstream file says; a `Row` of `CellValue`s is
//! what the target table holds after column conversion.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::ID_COLUMN;

/// Reconciliation key of a record / row.
pub type RecordId = i64;

/// Attribute mapping of a source record, ordered by column name.
pub type Attributes = BTreeMap<String, Value>;

/// A converted row: column name → typed cell.
pub type Row = BTreeMap<String, CellValue>;

/// Text format used to persist datetime cells.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Digest
// =============================================================================

/// Hex-encoded content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wraps an already hex-encoded digest (e.g. one read from the ledger).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Digest(hex.into())
    }

    /// Returns the hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Source Record
// =============================================================================

/// One logical row read from the upstream source.
///
/// Immutable once built; the `id` is extracted from the `id` attribute, which
/// stays part of `attributes` so it is covered by the record digest.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    id: RecordId,
    attributes: Attributes,
}

impl SourceRecord {
    /// Builds a record from an attribute mapping.
    ///
    /// ## Arguments
    /// * `position` - Index of the record in its source (for error messages)
    /// * `attributes` - Column name → value
    ///
    /// ## Errors
    /// * `CoreError::MissingId` - no `id` attribute
    /// * `CoreError::InvalidId` - `id` is neither an integer nor an integer string
    pub fn new(position: usize, attributes: Attributes) -> CoreResult<Self> {
        let raw = attributes
            .get(ID_COLUMN)
            .ok_or(CoreError::MissingId { position })?;

        let id = parse_record_id(raw).ok_or_else(|| CoreError::InvalidId {
            position,
            value: raw.to_string(),
        })?;

        Ok(SourceRecord { id, attributes })
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_value(position: usize, value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Self::new(position, map.into_iter().collect()),
            _ => Err(CoreError::NotAnObject { position }),
        }
    }

    /// The reconciliation key.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// All attributes, including `id`.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns a single attribute.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }
}

fn parse_record_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Cell Values
// =============================================================================

/// A typed value as stored in (or destined for) a target table cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl CellValue {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Returns the integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            CellValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Real(r) => write!(f, "{}", r),
            CellValue::Text(s) => write!(f, "'{}'", s),
            CellValue::Boolean(b) => write!(f, "{}", b),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

/// Parses the datetime spellings accepted in source files and in storage.
///
/// Accepted: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` (both with
/// optional fractional seconds, interpreted as UTC) and bare `YYYY-MM-DD`.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// =============================================================================
// Column Metadata
// =============================================================================

/// Storage class of a column, derived from its declared SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    DateTime,
}

impl ColumnType {
    /// Maps a declared SQLite type to a column type.
    ///
    /// ## Mapping
    /// ```text
    /// BOOL, BOOLEAN                         → Boolean
    /// DATETIME, TIMESTAMP, DATE             → DateTime
    /// contains INT                          → Integer
    /// REAL, FLOA, DOUB, NUMERIC, DECIMAL    → Real
    /// anything else (TEXT, VARCHAR, BLOB)   → Text
    /// ```
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();

        if upper.starts_with("BOOL") {
            ColumnType::Boolean
        } else if upper.starts_with("DATETIME")
            || upper.starts_with("TIMESTAMP")
            || upper == "DATE"
        {
            ColumnType::DateTime
        } else if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::DateTime => write!(f, "datetime"),
        }
    }
}

/// A column default declared in the schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// Literal default value.
    Value(CellValue),
    /// `CURRENT_TIMESTAMP` / `CURRENT_DATE` / `datetime('now')`.
    Now,
}

impl ColumnDefault {
    /// Interprets a default expression as reported by `PRAGMA table_info`.
    ///
    /// Returns `None` for `NULL` and for expressions that cannot be evaluated
    /// client-side; such columns are treated as having no default.
    pub fn parse(expr: &str, column_type: ColumnType) -> Option<Self> {
        let mut expr = expr.trim();
        while expr.starts_with('(') && expr.ends_with(')') && expr.len() >= 2 {
            expr = expr[1..expr.len() - 1].trim();
        }

        let upper = expr.to_ascii_uppercase();
        if upper == "NULL" || expr.is_empty() {
            return None;
        }
        if matches!(
            upper.as_str(),
            "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "DATETIME('NOW')" | "DATE('NOW')"
        ) {
            return Some(ColumnDefault::Now);
        }

        let literal = if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
            expr[1..expr.len() - 1].replace("''", "'")
        } else {
            expr.to_string()
        };

        let value = match column_type {
            ColumnType::Integer => CellValue::Integer(literal.parse().ok()?),
            ColumnType::Real => CellValue::Real(literal.parse().ok()?),
            ColumnType::Boolean => match literal.to_ascii_lowercase().as_str() {
                "1" | "true" => CellValue::Boolean(true),
                "0" | "false" => CellValue::Boolean(false),
                _ => return None,
            },
            ColumnType::DateTime => CellValue::DateTime(parse_datetime(&literal)?),
            ColumnType::Text => CellValue::Text(literal),
        };

        Some(ColumnDefault::Value(value))
    }
}

/// Metadata for one column of a target table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Type as written in the DDL (e.g. `VARCHAR(50)`).
    pub declared_type: String,

    /// Storage class used for conversion.
    pub column_type: ColumnType,

    /// Whether NULL is allowed.
    pub nullable: bool,

    /// Default applied when the source value is null.
    pub default: Option<ColumnDefault>,

    /// Whether the column is (part of) the primary key.
    pub primary_key: bool,
}

/// Column layout of a target table, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_record_id_from_number_and_string() {
        let a = SourceRecord::from_value(0, json!({"id": 7, "name": "x"})).unwrap();
        assert_eq!(a.id(), 7);

        let b = SourceRecord::from_value(1, json!({"id": " 42 "})).unwrap();
        assert_eq!(b.id(), 42);
    }

    #[test]
    fn test_record_id_errors() {
        let missing = SourceRecord::from_value(2, json!({"name": "x"}));
        assert!(matches!(missing, Err(CoreError::MissingId { position: 2 })));

        let invalid = SourceRecord::from_value(3, json!({"id": "abc"}));
        assert!(matches!(invalid, Err(CoreError::InvalidId { position: 3, .. })));

        let not_object = SourceRecord::from_value(4, json!([1, 2]));
        assert!(matches!(not_object, Err(CoreError::NotAnObject { position: 4 })));
    }

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(ColumnType::from_declared("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("bigint"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("VARCHAR(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("DECIMAL(10,2)"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("BOOLEAN"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_declared("DATETIME"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_declared(""), ColumnType::Text);
    }

    #[test]
    fn test_column_default_parsing() {
        assert_eq!(
            ColumnDefault::parse("0", ColumnType::Integer),
            Some(ColumnDefault::Value(CellValue::Integer(0)))
        );
        assert_eq!(
            ColumnDefault::parse("'it''s'", ColumnType::Text),
            Some(ColumnDefault::Value(CellValue::Text("it's".into())))
        );
        assert_eq!(
            ColumnDefault::parse("CURRENT_TIMESTAMP", ColumnType::DateTime),
            Some(ColumnDefault::Now)
        );
        assert_eq!(ColumnDefault::parse("NULL", ColumnType::Text), None);
        assert_eq!(ColumnDefault::parse("(abs(-1))", ColumnType::Integer), None);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let a = parse_datetime("2024-03-01 12:30:00").unwrap();
        assert_eq!((a.year(), a.month(), a.day(), a.hour()), (2024, 3, 1, 12));

        let b = parse_datetime("2024-03-01T12:30:00+09:00").unwrap();
        assert_eq!(b.hour(), 3);

        let c = parse_datetime("2024-03-01").unwrap();
        assert_eq!(c.hour(), 0);

        assert!(parse_datetime("yesterday").is_none());
    }
}
