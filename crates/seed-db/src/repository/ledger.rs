//! # Digest Ledger Repository
//!
//! Per-record digests in `seed_records`, keyed by `(seed_table_id, record_id)`.
//!
//! ## Bulk Digest Update
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  One statement per chunk instead of one UPDATE per record:             │
//! │                                                                         │
//! │  UPDATE seed_records                                                   │
//! │  SET digest = CASE record_id                                           │
//! │                 WHEN 3 THEN 'ab12…'                                    │
//! │                 WHEN 7 THEN 'cd34…'                                    │
//! │               END,                                                      │
//! │      updated_at = ?                                                     │
//! │  WHERE seed_table_id = ? AND record_id IN (3, 7)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use seed_core::{Digest, RecordId};

use super::rows_per_statement;
use crate::error::DbResult;

/// Repository for `seed_records`.
#[derive(Debug, Clone)]
pub struct DigestLedgerRepository {
    pool: SqlitePool,
}

impl DigestLedgerRepository {
    /// Creates a new DigestLedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DigestLedgerRepository { pool }
    }

    /// Loads all digests of a table.
    pub async fn digests(&self, seed_table_id: i64) -> DbResult<HashMap<RecordId, Digest>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT record_id, digest FROM seed_records WHERE seed_table_id = ?1",
        )
        .bind(seed_table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, digest)| (id, Digest::from_hex(digest)))
            .collect())
    }

    /// Loads the record ids tracked for a table.
    pub async fn record_ids(&self, seed_table_id: i64) -> DbResult<HashSet<RecordId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT record_id FROM seed_records WHERE seed_table_id = ?1")
                .bind(seed_table_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids.into_iter().collect())
    }

    /// Number of ledger entries of a table.
    pub async fn count(&self, seed_table_id: i64) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM seed_records WHERE seed_table_id = ?1")
                .bind(seed_table_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Creates entries in one transaction.
    ///
    /// An entry that already exists has its digest replaced, so a retry
    /// after a failed run cannot trip the unique key.
    ///
    /// ## Returns
    /// Number of rows written.
    pub async fn insert_digests(
        &self,
        seed_table_id: i64,
        entries: &[(RecordId, Digest)],
    ) -> DbResult<u64> {
        if entries.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut written = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in entries.chunks(rows_per_statement(5)) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO seed_records (seed_table_id, record_id, digest, created_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, (record_id, digest)| {
                b.push_bind(seed_table_id)
                    .push_bind(*record_id)
                    .push_bind(digest.as_str().to_string())
                    .push_bind(now)
                    .push_bind(now);
            });
            qb.push(
                " ON CONFLICT(seed_table_id, record_id) DO UPDATE SET \
                 digest = excluded.digest, updated_at = excluded.updated_at",
            );

            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(seed_table_id, written, "Inserted digests");
        Ok(written)
    }

    /// Replaces digests of existing entries, one CASE statement per chunk,
    /// all in one transaction. Ids without an entry are ignored.
    ///
    /// ## Returns
    /// Number of entries updated.
    pub async fn bulk_update_digests(
        &self,
        seed_table_id: i64,
        digests: &BTreeMap<RecordId, Digest>,
    ) -> DbResult<u64> {
        if digests.is_empty() {
            return Ok(0);
        }

        let entries: Vec<(&RecordId, &Digest)> = digests.iter().collect();
        let now = Utc::now();
        let mut updated = 0;
        let mut tx = self.pool.begin().await?;

        // WHEN id THEN digest + IN (id) = 3 binds per entry
        for chunk in entries.chunks(rows_per_statement(3)) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE seed_records SET digest = CASE record_id");
            for (record_id, digest) in chunk {
                qb.push(" WHEN ")
                    .push_bind(**record_id)
                    .push(" THEN ")
                    .push_bind(digest.as_str().to_string());
            }
            qb.push(" END, updated_at = ")
                .push_bind(now)
                .push(" WHERE seed_table_id = ")
                .push_bind(seed_table_id)
                .push(" AND record_id IN (");
            let mut ids = qb.separated(", ");
            for (record_id, _) in chunk {
                ids.push_bind(**record_id);
            }
            ids.push_unseparated(")");

            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(seed_table_id, updated, "Bulk-updated digests");
        Ok(updated)
    }

    /// Deletes the entries of the given records in one transaction.
    pub async fn delete_record_ids(&self, seed_table_id: i64, ids: &[RecordId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in ids.chunks(rows_per_statement(1)) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM seed_records WHERE seed_table_id = ");
            qb.push_bind(seed_table_id).push(" AND record_id IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            deleted += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        debug!(seed_table_id, deleted, "Deleted ledger entries");
        Ok(deleted)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
