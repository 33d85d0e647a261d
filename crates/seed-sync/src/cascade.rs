//! # Cascade Invalidation
//!
//! When a child table changes, the parent rows it points at may be cached
//! elsewhere with stale child data. The parent table is marked stale so its
//! next sync runs in full and readers bypass their caches.
//!
//! ```text
//!   colors (child)                         palettes (parent)
//!   id  palette_id                         seed_tables row
//!   7   2   ◄── inserted/updated ──┐       digest         → NULL
//!   8   2                          ├─────► cache_disabled → 1
//!   9   5   ◄── inserted/updated ──┘
//! ```

use tracing::info;

use seed_core::{RecordId, TableSchema};
use seed_db::{TableStateRepository, TargetTableRepository};

use crate::error::{SyncError, SyncResult};
use crate::registry::ParentRelation;

/// Marks parent tables stale after a child table was written.
#[derive(Debug, Clone)]
pub struct CascadeInvalidator {
    table_states: TableStateRepository,
}

impl CascadeInvalidator {
    pub fn new(table_states: TableStateRepository) -> Self {
        CascadeInvalidator { table_states }
    }

    /// Invalidates `relation.table` if any of `ids` references it.
    ///
    /// ## Arguments
    /// * `target` - The child table that was just written
    /// * `schema` - Its schema, used to check the foreign key exists
    /// * `relation` - Parent table and foreign-key column
    /// * `ids` - Child ids inserted or updated by the run
    ///
    /// ## Returns
    /// The distinct parent ids referenced, sorted. Empty means the parent was
    /// left untouched.
    pub async fn invalidate(
        &self,
        target: &TargetTableRepository,
        schema: &TableSchema,
        relation: &ParentRelation,
        ids: &[RecordId],
    ) -> SyncResult<Vec<RecordId>> {
        if schema.column(&relation.foreign_key).is_none() {
            return Err(SyncError::InvalidConfig(format!(
                "'{}' has no column '{}' referencing '{}'",
                target.name(),
                relation.foreign_key,
                relation.table
            )));
        }

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let parent_ids = target.distinct_column_values(&relation.foreign_key, ids).await?;
        if parent_ids.is_empty() {
            return Ok(parent_ids);
        }

        self.table_states.invalidate(&relation.table).await?;

        info!(
            table = %target.name(),
            parent = %relation.table,
            parent_ids = parent_ids.len(),
            "Invalidated parent table"
        );
        Ok(parent_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seed_core::Digest;
    use seed_db::{Database, DbConfig};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("CREATE TABLE colors (id INTEGER PRIMARY KEY, name TEXT, palette_id INTEGER)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO colors (id, name, palette_id) VALUES (1, 'red', 2), (2, 'blue', 2), (3, 'grey', NULL), (4, 'green', 5)")
            .execute(db.pool())
            .await
            .unwrap();
        db.table_states()
            .commit_digest("palettes", &Digest::from_hex("aa"), &Digest::from_hex("bb"))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_referenced_parent_is_invalidated() {
        let db = setup().await;
        let target = db.target("colors").unwrap();
        let schema = target.schema().await.unwrap();
        let cascade = CascadeInvalidator::new(db.table_states());

        let ids = cascade
            .invalidate(&target, &schema, &ParentRelation::new("palettes"), &[1, 2, 4])
            .await
            .unwrap();
        assert_eq!(ids, vec![2, 5]);

        let state = db.table_states().get("palettes").await.unwrap().unwrap();
        assert!(state.digest.is_none());
        assert!(state.cache_disabled);
    }

    #[tokio::test]
    async fn test_null_references_leave_parent_alone() {
        let db = setup().await;
        let target = db.target("colors").unwrap();
        let schema = target.schema().await.unwrap();
        let cascade = CascadeInvalidator::new(db.table_states());

        let ids = cascade
            .invalidate(&target, &schema, &ParentRelation::new("palettes"), &[3])
            .await
            .unwrap();
        assert!(ids.is_empty());

        let state = db.table_states().get("palettes").await.unwrap().unwrap();
        assert_eq!(state.table_digest(), Some(Digest::from_hex("aa")));
        assert!(!state.cache_disabled);
    }

    #[tokio::test]
    async fn test_missing_foreign_key_is_config_error() {
        let db = setup().await;
        let target = db.target("colors").unwrap();
        let schema = target.schema().await.unwrap();
        let cascade = CascadeInvalidator::new(db.table_states());

        let relation = ParentRelation::new("shades");
        let err = cascade.invalidate(&target, &schema, &relation, &[1]).await.unwrap_err();
        assert!(err.is_config_error());
    }
}
