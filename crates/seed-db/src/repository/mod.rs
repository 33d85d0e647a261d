//! # Repository Module
//!
//! Database repositories used by the sync engine.
//!
//! ## Repositories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  TableStateRepository    seed_tables      table digest, cache flag     │
//! │  DigestLedgerRepository  seed_records     (table, record_id) → digest  │
//! │  TargetTableRepository   <any table>      schema, ids, chunked writes  │
//! │                                                                         │
//! │  Target table names come from callers at run time, so queries are      │
//! │  built with QueryBuilder and every identifier goes through             │
//! │  quote_identifier() first.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod ledger;
pub mod table_state;
pub mod target;

use sqlx::{QueryBuilder, Sqlite};

use seed_core::types::{CellValue, DATETIME_FORMAT};

use crate::error::{DbError, DbResult};

/// Upper bound on bind parameters per statement.
///
/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` is 32766 since 3.32.
pub const MAX_BIND_PARAMS: usize = 32_000;

/// Validates a table or column name and returns it double-quoted.
pub fn quote_identifier(name: &str) -> DbResult<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(format!("\"{}\"", name))
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

/// Number of rows that fit in one statement given the binds per row.
pub(crate) fn rows_per_statement(binds_per_row: usize) -> usize {
    (MAX_BIND_PARAMS / binds_per_row.max(1)).max(1)
}

/// Appends a bind parameter for one cell.
///
/// Datetimes are bound as `YYYY-MM-DD HH:MM:SS` UTC text.
pub(crate) fn push_cell(qb: &mut QueryBuilder<'_, Sqlite>, cell: &CellValue) {
    match cell {
        CellValue::Null => qb.push_bind(None::<i64>),
        CellValue::Integer(i) => qb.push_bind(*i),
        CellValue::Real(r) => qb.push_bind(*r),
        CellValue::Text(s) => qb.push_bind(s.clone()),
        CellValue::Boolean(b) => qb.push_bind(*b),
        CellValue::DateTime(dt) => qb.push_bind(dt.format(DATETIME_FORMAT).to_string()),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("colors").unwrap(), "\"colors\"");
        assert_eq!(quote_identifier("_tmp_2").unwrap(), "\"_tmp_2\"");

        for bad in ["", "2colors", "colors\"", "a b", "x;y"] {
            assert!(matches!(quote_identifier(bad), Err(DbError::InvalidIdentifier(_))));
        }
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(4), 8_000);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(usize::MAX), 1);
    }
}
