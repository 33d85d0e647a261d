//! # Digests
//!
//! Content hashes used for change detection.
//!
//! ## Three Digests
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_digest(record)                                                 │
//! │    attributes ─► sort keys (recursively) ─► MessagePack ─► SHA-256     │
//! │    Stored per record in the ledger. Unchanged digest = no write.       │
//! │                                                                         │
//! │  table_digest(raw bytes)                                               │
//! │    exact source file bytes ─► SHA-256                                  │
//! │    Stored per table. Unchanged digest = whole run skipped.             │
//! │                                                                         │
//! │  schema_digest(schema)                                                 │
//! │    sorted (column, declared type) pairs ─► MessagePack ─► SHA-256      │
//! │    A schema change invalidates the whole-run skip.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};

use crate::error::CoreResult;
use crate::types::{Attributes, Digest, SourceRecord, TableSchema};

/// Computes the content digest of a record.
///
/// Keys are canonicalized before encoding, so two records with the same
/// attributes always hash identically no matter how the source ordered them.
pub fn record_digest(record: &SourceRecord) -> CoreResult<Digest> {
    let canonical: Attributes = record
        .attributes()
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();

    let bytes = rmp_serde::to_vec(&canonical)?;
    Ok(sha256_hex(&bytes))
}

/// Computes the digest of the raw source input.
pub fn table_digest(raw: &[u8]) -> Digest {
    sha256_hex(raw)
}

/// Computes the digest of a table's column definitions.
pub fn schema_digest(schema: &TableSchema) -> CoreResult<Digest> {
    let mut columns: Vec<(&str, &str)> = schema
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.declared_type.as_str()))
        .collect();
    columns.sort_unstable();

    let bytes = rmp_serde::to_vec(&columns)?;
    Ok(sha256_hex(&bytes))
}

/// Rebuilds nested objects with keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest::from_hex(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnInfo, ColumnType};
    use serde_json::json;

    fn record(value: Value) -> SourceRecord {
        SourceRecord::from_value(0, value).unwrap()
    }

    #[test]
    fn test_record_digest_ignores_key_order() {
        let a = record(json!({"id": 1, "name": "a", "meta": {"x": 1, "y": 2}}));

        let mut attrs = serde_json::Map::new();
        attrs.insert("meta".into(), json!({"y": 2, "x": 1}));
        attrs.insert("name".into(), json!("a"));
        attrs.insert("id".into(), json!(1));
        let b = record(Value::Object(attrs));

        assert_eq!(record_digest(&a).unwrap(), record_digest(&b).unwrap());
    }

    #[test]
    fn test_record_digest_detects_value_change() {
        let a = record(json!({"id": 1, "name": "a"}));
        let b = record(json!({"id": 1, "name": "b"}));
        assert_ne!(record_digest(&a).unwrap(), record_digest(&b).unwrap());
    }

    #[test]
    fn test_table_digest_is_byte_exact() {
        let a = table_digest(b"[{\"id\":1}]");
        let b = table_digest(b"[{\"id\": 1}]");
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a, table_digest(b"[{\"id\":1}]"));
    }

    #[test]
    fn test_schema_digest_ignores_column_order() {
        let col = |name: &str, ty: &str| ColumnInfo {
            name: name.into(),
            declared_type: ty.into(),
            column_type: ColumnType::from_declared(ty),
            nullable: true,
            default: None,
            primary_key: false,
        };
        let a = TableSchema {
            table: "t".into(),
            columns: vec![col("id", "INTEGER"), col("name", "TEXT")],
        };
        let b = TableSchema {
            table: "t".into(),
            columns: vec![col("name", "TEXT"), col("id", "INTEGER")],
        };
        let c = TableSchema {
            table: "t".into(),
            columns: vec![col("id", "INTEGER"), col("name", "VARCHAR(10)")],
        };

        assert_eq!(schema_digest(&a).unwrap(), schema_digest(&b).unwrap());
        assert_ne!(schema_digest(&a).unwrap(), schema_digest(&c).unwrap());
    }
}
