//! # Target Table Repository
//!
//! Runtime access to a host-owned table being synchronized.
//!
//! ## Operations by Sync Phase
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Phase            Operation                    Transaction              │
//! │  ───────────────  ───────────────────────────  ───────────────────────  │
//! │  setup            schema(), exists()           -                        │
//! │  truncate         truncate_with_ledger()       table + ledger, one tx   │
//! │  delete           ids(), delete_ids()          one tx for all ids       │
//! │  insert           count_consistent()           read tx, before/after    │
//! │                   insert_rows(chunk)           one tx per chunk         │
//! │  update           fetch_rows(ids)              -                        │
//! │                   update_rows(chunk)           one tx per chunk         │
//! │  cascade          distinct_column_values()     -                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every table must have an integer `id` column; it is the reconciliation key.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tracing::debug;

use seed_core::types::{
    parse_datetime, CellValue, ColumnDefault, ColumnInfo, ColumnType, RecordId, Row, TableSchema,
};
use seed_core::ID_COLUMN;

use super::{push_cell, quote_identifier, rows_per_statement};
use crate::error::{DbError, DbResult};

/// Repository for one target table.
#[derive(Debug, Clone)]
pub struct TargetTableRepository {
    pool: SqlitePool,
    table: String,
    quoted: String,
}

impl TargetTableRepository {
    /// Creates a repository for `table`.
    ///
    /// ## Errors
    /// `DbError::InvalidIdentifier` if the name is not a plain identifier.
    pub fn new(pool: SqlitePool, table: &str) -> DbResult<Self> {
        let quoted = quote_identifier(table)?;
        Ok(TargetTableRepository {
            pool,
            table: table.to_string(),
            quoted,
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.table
    }

    /// Returns true if the table exists.
    pub async fn exists(&self) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Reads column metadata through `PRAGMA table_info`.
    ///
    /// ## Errors
    /// `DbError::UnknownTable` if the table does not exist.
    pub async fn schema(&self) -> DbResult<TableSchema> {
        let sql = format!("PRAGMA table_info({})", self.quoted);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        if rows.is_empty() {
            return Err(DbError::UnknownTable(self.table.clone()));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let declared_type: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default_expr: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;

            let column_type = ColumnType::from_declared(&declared_type);
            let default = default_expr
                .as_deref()
                .and_then(|expr| ColumnDefault::parse(expr, column_type));

            columns.push(ColumnInfo {
                name,
                declared_type,
                column_type,
                nullable: not_null == 0,
                default,
                primary_key: pk > 0,
            });
        }

        Ok(TableSchema {
            table: self.table.clone(),
            columns,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// All ids currently in the table.
    pub async fn ids(&self) -> DbResult<HashSet<RecordId>> {
        let sql = format!("SELECT {} FROM {}", ID_COLUMN, self.quoted);
        let ids: Vec<i64> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }

    /// Row count read inside a transaction on the writer pool, so it sees
    /// every committed write.
    pub async fn count_consistent(&self) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.quoted);

        let mut tx = self.pool.begin().await?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *tx).await?;
        tx.commit().await?;

        Ok(count)
    }

    /// Loads the stored rows for `ids`, decoded against `schema`.
    pub async fn fetch_rows(
        &self,
        schema: &TableSchema,
        ids: &[RecordId],
    ) -> DbResult<HashMap<RecordId, Row>> {
        let mut rows = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(rows_per_statement(1)) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM ");
            qb.push(&self.quoted)
                .push(" WHERE ")
                .push(ID_COLUMN)
                .push(" IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            for stored in qb.build().fetch_all(&self.pool).await? {
                let id: i64 = stored.try_get(ID_COLUMN)?;
                let mut row = Row::new();
                for column in &schema.columns {
                    row.insert(column.name.clone(), decode_cell(&stored, column)?);
                }
                rows.insert(id, row);
            }
        }

        Ok(rows)
    }

    /// Distinct non-null values of `column` among the rows with `ids`,
    /// sorted ascending.
    pub async fn distinct_column_values(
        &self,
        column: &str,
        ids: &[RecordId],
    ) -> DbResult<Vec<RecordId>> {
        let quoted_column = quote_identifier(column)?;
        let mut values = BTreeSet::new();

        for chunk in ids.chunks(rows_per_statement(1)) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT DISTINCT ");
            qb.push(&quoted_column)
                .push(" FROM ")
                .push(&self.quoted)
                .push(" WHERE ")
                .push(&quoted_column)
                .push(" IS NOT NULL AND ")
                .push(ID_COLUMN)
                .push(" IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            let found: Vec<i64> = qb.build_query_scalar::<i64>().fetch_all(&self.pool).await?;
            values.extend(found);
        }

        Ok(values.into_iter().collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Deletes rows by id in a single transaction.
    ///
    /// ## Returns
    /// Number of rows deleted.
    pub async fn delete_ids(&self, ids: &[RecordId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in ids.chunks(rows_per_statement(1)) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM ");
            qb.push(&self.quoted)
                .push(" WHERE ")
                .push(ID_COLUMN)
                .push(" IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            deleted += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(table = %self.table, deleted, "Deleted rows");
        Ok(deleted)
    }

    /// Empties the table and its digest ledger in one transaction.
    ///
    /// ## Returns
    /// Number of table rows deleted.
    pub async fn truncate_with_ledger(&self) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(&format!("DELETE FROM {}", self.quoted))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM seed_records
            WHERE seed_table_id IN (SELECT id FROM seed_tables WHERE name = ?1)
            "#,
        )
        .bind(&self.table)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(table = %self.table, deleted, "Truncated table and ledger");
        Ok(deleted)
    }

    /// Inserts rows in one transaction.
    ///
    /// Rows are grouped by their column set so absent columns keep their
    /// database defaults. Rows whose id already exists are skipped
    /// (`ON CONFLICT DO NOTHING`); compare the returned count with the
    /// input length to detect them.
    ///
    /// ## Returns
    /// Number of rows actually inserted.
    pub async fn insert_rows(&self, rows: &[Row]) -> DbResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut groups: BTreeMap<Vec<&str>, Vec<&Row>> = BTreeMap::new();
        for row in rows {
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            groups.entry(columns).or_default().push(row);
        }

        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for (columns, group) in &groups {
            let quoted_columns = columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<DbResult<Vec<_>>>()?
                .join(", ");

            for chunk in group.chunks(rows_per_statement(columns.len())) {
                let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO ");
                qb.push(&self.quoted)
                    .push(" (")
                    .push(&quoted_columns)
                    .push(") VALUES ");

                for (i, row) in chunk.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    qb.push("(");
                    for (j, cell) in row.values().enumerate() {
                        if j > 0 {
                            qb.push(", ");
                        }
                        push_cell(&mut qb, cell);
                    }
                    qb.push(")");
                }
                qb.push(" ON CONFLICT DO NOTHING");

                inserted += qb.build().execute(&mut *tx).await?.rows_affected();
            }
        }

        tx.commit().await?;

        debug!(table = %self.table, inserted, "Inserted rows");
        Ok(inserted)
    }

    /// Updates rows by id in one transaction. Only the columns present in
    /// each row are written; the `id` column itself is never updated.
    ///
    /// ## Returns
    /// Number of rows updated.
    pub async fn update_rows(&self, rows: &[(RecordId, Row)]) -> DbResult<u64> {
        let mut updated = 0;
        let mut tx = self.pool.begin().await?;

        for (id, row) in rows {
            let mut cells = row.iter().filter(|(column, _)| column.as_str() != ID_COLUMN).peekable();
            if cells.peek().is_none() {
                continue;
            }

            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE ");
            qb.push(&self.quoted).push(" SET ");
            for (i, (column, cell)) in cells.enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(quote_identifier(column)?).push(" = ");
                push_cell(&mut qb, cell);
            }
            qb.push(" WHERE ").push(ID_COLUMN).push(" = ").push_bind(*id);

            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(table = %self.table, updated, "Updated rows");
        Ok(updated)
    }
}

// =============================================================================
// Cell Decoding
// =============================================================================

/// Decodes a stored value into the cell type conversion would produce for
/// the column, so stored and incoming rows compare equal when unchanged.
fn decode_cell(row: &SqliteRow, column: &ColumnInfo) -> DbResult<CellValue> {
    let name = column.name.as_str();

    let storage = {
        let raw = row.try_get_raw(name)?;
        if raw.is_null() {
            return Ok(CellValue::Null);
        }
        raw.type_info().name().to_string()
    };

    let cell = match storage.as_str() {
        "INTEGER" => {
            let value: i64 = row.try_get(name)?;
            match column.column_type {
                ColumnType::Boolean => CellValue::Boolean(value != 0),
                ColumnType::Real => CellValue::Real(value as f64),
                ColumnType::Text => CellValue::Text(value.to_string()),
                ColumnType::DateTime => Utc
                    .timestamp_opt(value, 0)
                    .single()
                    .map_or(CellValue::Integer(value), CellValue::DateTime),
                ColumnType::Integer => CellValue::Integer(value),
            }
        }
        "REAL" => {
            let value: f64 = row.try_get(name)?;
            match column.column_type {
                ColumnType::Integer if value.fract() == 0.0 => CellValue::Integer(value as i64),
                ColumnType::Text => CellValue::Text(value.to_string()),
                _ => CellValue::Real(value),
            }
        }
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get(name)?;
            CellValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => {
            let text: String = row.try_get_unchecked(name)?;
            match column.column_type {
                ColumnType::DateTime => {
                    parse_datetime(&text).map_or(CellValue::Text(text), CellValue::DateTime)
                }
                ColumnType::Integer => match text.trim().parse() {
                    Ok(i) => CellValue::Integer(i),
                    Err(_) => CellValue::Text(text),
                },
                ColumnType::Real => match text.trim().parse() {
                    Ok(r) => CellValue::Real(r),
                    Err(_) => CellValue::Text(text),
                },
                _ => CellValue::Text(text),
            }
        }
    };

    Ok(cell)
}

// =============================================================================
// Unit Tests
// =============================================================================
