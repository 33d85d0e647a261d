//! # Table State Repository
//!
//! One row per synchronized table in `seed_tables`.
//!
//! ## Lifecycle of a Table State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  first sync          get_or_create("colors")   digest = NULL           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  clean run           commit_digest(...)        digest = <sha256>       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  unchanged source    digest matches → run skipped                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  child table synced  invalidate("colors")      digest = NULL           │
//! │                                                cache_disabled = 1      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  next sync cannot be skipped; readers bypass their caches              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use seed_core::Digest;

use crate::error::{DbError, DbResult};

/// A row of `seed_tables`.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TableState {
    pub id: i64,
    pub name: String,
    pub digest: Option<String>,
    pub schema_digest: Option<String>,
    pub cache_disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableState {
    /// Source digest of the last successful run.
    pub fn table_digest(&self) -> Option<Digest> {
        self.digest.as_deref().map(Digest::from_hex)
    }

    /// Schema digest recorded with the last successful run.
    pub fn table_schema_digest(&self) -> Option<Digest> {
        self.schema_digest.as_deref().map(Digest::from_hex)
    }
}

/// Repository for `seed_tables`.
#[derive(Debug, Clone)]
pub struct TableStateRepository {
    pool: SqlitePool,
}

impl TableStateRepository {
    /// Creates a new TableStateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TableStateRepository { pool }
    }

    /// Gets the state of a table, if it was ever synchronized.
    pub async fn get(&self, name: &str) -> DbResult<Option<TableState>> {
        let state = sqlx::query_as::<_, TableState>(
            r#"
            SELECT id, name, digest, schema_digest, cache_disabled, created_at, updated_at
            FROM seed_tables
            WHERE name = ?1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    /// Gets the state of a table, creating an empty one on first use.
    pub async fn get_or_create(&self, name: &str) -> DbResult<TableState> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO seed_tables (name, cache_disabled, created_at, updated_at)
            VALUES (?1, 0, ?2, ?2)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(name)
            .await?
            .ok_or_else(|| DbError::not_found("TableState", name))
    }

    /// Records the digests of a successful run.
    ///
    /// ## Arguments
    /// * `name` - Target table
    /// * `digest` - Digest of the raw source input
    /// * `schema_digest` - Digest of the table's columns at this run
    pub async fn commit_digest(
        &self,
        name: &str,
        digest: &Digest,
        schema_digest: &Digest,
    ) -> DbResult<()> {
        debug!(table = %name, digest = %digest, "Committing table digest");

        sqlx::query(
            r#"
            INSERT INTO seed_tables (name, digest, schema_digest, cache_disabled, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?4)
            ON CONFLICT(name) DO UPDATE SET
                digest = excluded.digest,
                schema_digest = excluded.schema_digest,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(digest.as_str())
        .bind(schema_digest.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Forgets the source digest so the next run cannot be skipped.
    ///
    /// Called before a run starts mutating the table; a successful run
    /// commits a fresh digest afterwards.
    pub async fn clear_digest(&self, name: &str) -> DbResult<()> {
        sqlx::query("UPDATE seed_tables SET digest = NULL, updated_at = ?2 WHERE name = ?1")
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Sets the cache-disabled flag.
    pub async fn disable_record_cache(&self, name: &str) -> DbResult<()> {
        self.set_cache_disabled(name, true).await
    }

    /// Clears the cache-disabled flag.
    pub async fn enable_record_cache(&self, name: &str) -> DbResult<()> {
        self.set_cache_disabled(name, false).await
    }

    async fn set_cache_disabled(&self, name: &str, disabled: bool) -> DbResult<()> {
        debug!(table = %name, disabled, "Setting record cache flag");

        sqlx::query(
            r#"
            INSERT INTO seed_tables (name, cache_disabled, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(name) DO UPDATE SET
                cache_disabled = excluded.cache_disabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(disabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the cache-disabled flag; false for unknown tables.
    pub async fn is_record_cache_disabled(&self, name: &str) -> DbResult<bool> {
        Ok(self.get(name).await?.map_or(false, |s| s.cache_disabled))
    }

    /// Marks a table stale: cache disabled and stored digest cleared, so its
    /// next sync cannot be skipped.
    pub async fn invalidate(&self, name: &str) -> DbResult<()> {
        debug!(table = %name, "Invalidating table state");

        sqlx::query(
            r#"
            INSERT INTO seed_tables (name, digest, cache_disabled, created_at, updated_at)
            VALUES (?1, NULL, 1, ?2, ?2)
            ON CONFLICT(name) DO UPDATE SET
                digest = NULL,
                cache_disabled = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists all table states ordered by name.
    pub async fn list(&self) -> DbResult<Vec<TableState>> {
        let states = sqlx::query_as::<_, TableState>(
            r#"
            SELECT id, name, digest, schema_digest, cache_disabled, created_at, updated_at
            FROM seed_tables
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(states)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use seed_core::Digest;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.table_states();

        assert!(repo.get("colors").await.unwrap().is_none());

        let a = repo.get_or_create("colors").await.unwrap();
        let b = repo.get_or_create("colors").await.unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.digest.is_none());
        assert!(!a.cache_disabled);
    }

    #[tokio::test]
    async fn test_commit_then_invalidate() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.table_states();

        repo.commit_digest("colors", &Digest::from_hex("aa"), &Digest::from_hex("bb"))
            .await
            .unwrap();

        let state = repo.get("colors").await.unwrap().unwrap();
        assert_eq!(state.table_digest(), Some(Digest::from_hex("aa")));
        assert_eq!(state.table_schema_digest(), Some(Digest::from_hex("bb")));

        repo.clear_digest("colors").await.unwrap();
        let state = repo.get("colors").await.unwrap().unwrap();
        assert!(state.digest.is_none());
        assert!(!state.cache_disabled);

        repo.invalidate("colors").await.unwrap();
        let state = repo.get("colors").await.unwrap().unwrap();
        assert!(state.digest.is_none());
        assert!(state.cache_disabled);
        // Schema digest survives invalidation
        assert_eq!(state.table_schema_digest(), Some(Digest::from_hex("bb")));
    }

    #[tokio::test]
    async fn test_cache_flag_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.table_states();

        assert!(!repo.is_record_cache_disabled("sizes").await.unwrap());

        repo.disable_record_cache("sizes").await.unwrap();
        assert!(repo.is_record_cache_disabled("sizes").await.unwrap());

        repo.enable_record_cache("sizes").await.unwrap();
        assert!(!repo.is_record_cache_disabled("sizes").await.unwrap());

        let names: Vec<String> = repo.list().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["sizes".to_string()]);
    }
}
