//! # Sync Engine
//!
//! Runs one table through a complete sync and reports what happened.
//!
//! ## Run Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Resolve      registry entry, target schema, schema digest          │
//! │  2. Read         source.load()                  [reading_data]         │
//! │  3. Guard        duplicate ids → Err, nothing touched                  │
//! │  4. Mode         truncate  → empty table + ledger    [truncating]      │
//! │                  force     → disable record cache    [disabling_...]   │
//! │                  otherwise → skip if digest and schema unchanged       │
//! │  5. Unlock       clear the stored table digest                         │
//! │  6. Delete       ids missing from the source        [deleting]         │
//! │  7. Reconcile    insert / update / unchanged                           │
//! │  8. Write        BatchWriter inserts, then updates                     │
//! │  9. Ledger       waste cleanup, digests for written ids                │
//! │ 10. Validate     EntityValidator::after_sync_validate                  │
//! │ 11. Cascade      invalidate the parent table                           │
//! │ 12. Commit       table + schema digest, only when nothing failed       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record Cache
//! While a table's record cache is disabled (force mode, or a child table
//! invalidated it) the ledger digests are not trusted: every existing record
//! goes through the update phase, which still writes only rows that differ.
//! A clean run re-enables the cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use seed_core::{
    deletion_set, ensure_unique_ids, reconcile, schema_digest, ConversionOptions, Digest,
    NvlTable, RecordId, ValueConverter, Violation, DEFAULT_BATCH_SIZE,
};
use seed_db::Database;

use crate::cascade::CascadeInvalidator;
use crate::error::SyncResult;
use crate::ledger::LedgerMaintainer;
use crate::observer::{Progress, SyncObserver, SyncPhase, TracingObserver};
use crate::registry::{EntityDescriptor, EntityRegistry, ParentRelation, SyncedIds};
use crate::source::RecordSource;
use crate::writer::{BatchWriter, RecordFailure};

// =============================================================================
// Options
// =============================================================================

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Empty the table and its ledger before writing.
    pub truncate_mode: bool,

    /// Run even if the source is unchanged, re-checking every record.
    pub force_update_mode: bool,

    /// Replace nulls with `nvl` values where the column has no default.
    pub nvl_mode: bool,

    /// Added to every parsed datetime.
    pub datetime_offset: Duration,

    /// Parent table to invalidate; overrides the registry relation.
    pub parent_table: Option<String>,

    /// Records per write chunk.
    pub batch_size: usize,

    pub nvl: NvlTable,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            truncate_mode: false,
            force_update_mode: false,
            nvl_mode: false,
            datetime_offset: Duration::zero(),
            parent_table: None,
            batch_size: DEFAULT_BATCH_SIZE,
            nvl: NvlTable::default(),
        }
    }
}

impl SyncOptions {
    pub fn truncate(mut self, on: bool) -> Self {
        self.truncate_mode = on;
        self
    }

    pub fn force_update(mut self, on: bool) -> Self {
        self.force_update_mode = on;
        self
    }

    pub fn nvl(mut self, on: bool) -> Self {
        self.nvl_mode = on;
        self
    }

    pub fn datetime_offset(mut self, offset: Duration) -> Self {
        self.datetime_offset = offset;
        self
    }

    pub fn parent_table(mut self, parent: impl Into<String>) -> Self {
        self.parent_table = Some(parent.into());
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            nvl_mode: self.nvl_mode,
            datetime_offset: self.datetime_offset,
            nvl: self.nvl.clone(),
        }
    }

    /// Parent relation for this run, if any.
    ///
    /// An explicit `parent_table` wins; it reuses the registry's foreign key
    /// when both name the same table.
    fn parent_relation(&self, descriptor: &EntityDescriptor) -> Option<ParentRelation> {
        match (&self.parent_table, &descriptor.parent) {
            (Some(table), Some(declared)) if declared.table == *table => Some(declared.clone()),
            (Some(table), _) => Some(ParentRelation::new(table)),
            (None, declared) => declared.clone(),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Source and schema unchanged; nothing was written.
    Skipped,
    Ok,
    /// Writes happened but some records or post-validation failed.
    Error,
}

/// Parent rows referenced by the records written in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub parent: String,
    pub ids: Vec<RecordId>,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub table: String,
    pub result: SyncOutcome,
    pub inserted_count: usize,
    pub updated_count: usize,
    pub actual_updated_count: usize,
    pub deleted_count: usize,
    pub failures: Vec<RecordFailure>,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeReport>,
}

impl SyncReport {
    fn skipped(run_id: Uuid, table: &str) -> Self {
        SyncReport {
            run_id,
            table: table.to_string(),
            result: SyncOutcome::Skipped,
            inserted_count: 0,
            updated_count: 0,
            actual_updated_count: 0,
            deleted_count: 0,
            failures: Vec::new(),
            violations: Vec::new(),
            cascade: None,
        }
    }

    /// True for `ok` and `skipped`.
    pub fn is_success(&self) -> bool {
        self.result != SyncOutcome::Error
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Synchronizes registered tables from record sources.
pub struct SyncEngine {
    db: Database,
    registry: EntityRegistry,
    observer: Arc<dyn SyncObserver>,
}

impl SyncEngine {
    /// Creates an engine that logs phases through `tracing`.
    pub fn new(db: Database, registry: EntityRegistry) -> Self {
        SyncEngine {
            db,
            registry,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replaces the phase observer.
    pub fn with_observer(mut self, observer: impl SyncObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Synchronizes `table` with `source`.
    ///
    /// ## Returns
    /// * `Ok(report)` - `skipped`, `ok`, or `error` when records failed
    ///   validation or post-validation reported violations
    /// * `Err(SyncError::Core(DuplicateIds))` - before anything was written
    /// * `Err(SyncError::IntegrityCount)` - after the insert phase; run
    ///   again in truncate mode
    /// * `Err(SyncError::UnknownTable)` - table not registered
    pub async fn sync(
        &self,
        table: &str,
        source: &dyn RecordSource,
        options: &SyncOptions,
    ) -> SyncResult<SyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync", table = %table, run_id = %run_id);
        self.run(run_id, table, source, options).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        table: &str,
        source: &dyn RecordSource,
        options: &SyncOptions,
    ) -> SyncResult<SyncReport> {
        let observer = self.observer.as_ref();
        let descriptor = self.registry.get(table)?;
        let table_states = self.db.table_states();

        let target = self.db.target(table)?;
        let schema = target.schema().await?;
        let current_schema_digest = schema_digest(&schema)?;

        // Read
        observer.before(table, SyncPhase::ReadingData, Progress::default());
        let data = source.load().await?;
        let total = data.records.len();
        observer.after(table, SyncPhase::ReadingData, Progress::new(total, total));

        ensure_unique_ids(&data.records)?;
        let source_digest = data.table_digest();

        let state = table_states.get_or_create(table).await?;
        let mut bypass_ledger = state.cache_disabled;

        // Mode
        if options.truncate_mode {
            observer.before(table, SyncPhase::Truncating, Progress::default());
            let removed = target.truncate_with_ledger().await?;
            observer.after(table, SyncPhase::Truncating, Progress::new(removed as usize, removed as usize));
        } else if options.force_update_mode {
            observer.before(table, SyncPhase::DisablingRecordCache, Progress::default());
            table_states.disable_record_cache(table).await?;
            bypass_ledger = true;
            observer.after(table, SyncPhase::DisablingRecordCache, Progress::default());
        } else if !state.cache_disabled
            && state.table_digest().as_ref() == Some(&source_digest)
            && state.table_schema_digest().as_ref() == Some(&current_schema_digest)
        {
            info!(source = %source.describe(), "Source unchanged, skipping");
            return Ok(SyncReport::skipped(run_id, table));
        }

        table_states.clear_digest(table).await?;

        // Delete
        let mut existing_ids = target.ids().await?;
        let deleted_ids = deletion_set(&existing_ids, &data.records);
        if !deleted_ids.is_empty() {
            let n = deleted_ids.len();
            observer.before(table, SyncPhase::Deleting, Progress::new(0, n));
            target.delete_ids(&deleted_ids).await?;
            observer.after(table, SyncPhase::Deleting, Progress::new(n, n));

            for id in &deleted_ids {
                existing_ids.remove(id);
            }
        }

        // Reconcile
        let ledger = self.db.ledger();
        let existing_digests = ledger.digests(state.id).await?;
        let trusted_digests = if bypass_ledger {
            HashMap::new()
        } else {
            existing_digests.clone()
        };
        let plan = reconcile(&existing_ids, &trusted_digests, &data.records)?;

        // Write
        let conversion = options.conversion_options();
        let converter = ValueConverter::new(&schema, &conversion, Utc::now());
        let writer = BatchWriter::new(
            &target,
            &converter,
            descriptor.validator.as_ref(),
            observer,
            options.batch_size,
        );

        let inserted = writer.insert_batch(&plan.to_insert).await?;
        let updated = writer.update_batch(&plan.to_update).await?;

        // Ledger
        let maintainer = LedgerMaintainer::new(ledger, state.id, table, observer, options.batch_size);
        let table_ids: HashSet<RecordId> = target.ids().await?;
        maintainer.remove_waste(&table_ids).await?;
        maintainer
            .record(&inserted.inserted_ids, &updated.updated_ids, &plan.digests, &existing_digests)
            .await?;

        // Post-validation
        let synced = SyncedIds {
            inserted: inserted.inserted_ids,
            updated: updated.updated_ids,
            actually_updated: updated.changed_ids,
            deleted: deleted_ids,
        };
        let violations = descriptor.validator.after_sync_validate(&self.db, &synced).await?;

        // Cascade
        let cascade = match options.parent_relation(descriptor) {
            Some(relation) => {
                let written: Vec<RecordId> =
                    synced.inserted.iter().chain(&synced.updated).copied().collect();
                let ids = CascadeInvalidator::new(table_states.clone())
                    .invalidate(&target, &schema, &relation, &written)
                    .await?;
                Some(CascadeReport {
                    parent: relation.table,
                    ids,
                })
            }
            None => None,
        };

        // Commit
        let mut failures = inserted.failures;
        failures.extend(updated.failures);

        let result = if failures.is_empty() && violations.is_empty() {
            table_states
                .commit_digest(table, &source_digest, &current_schema_digest)
                .await?;
            if bypass_ledger {
                table_states.enable_record_cache(table).await?;
            }
            SyncOutcome::Ok
        } else {
            warn!(
                failures = failures.len(),
                violations = violations.len(),
                "Run finished with errors, table digest not committed"
            );
            SyncOutcome::Error
        };

        let report = SyncReport {
            run_id,
            table: table.to_string(),
            result,
            inserted_count: synced.inserted.len(),
            updated_count: synced.updated.len(),
            actual_updated_count: synced.actually_updated.len(),
            deleted_count: synced.deleted.len(),
            failures,
            violations,
            cascade,
        };

        let ledger_entries = self.db.ledger().count(state.id).await?;
        info!(
            result = ?report.result,
            inserted = report.inserted_count,
            updated = report.updated_count,
            actual_updated = report.actual_updated_count,
            deleted = report.deleted_count,
            unchanged = plan.unchanged.len(),
            ledger_entries,
            "Sync finished"
        );
        Ok(report)
    }

    /// Digest the next run would need to match to be skipped.
    pub async fn stored_digest(&self, table: &str) -> SyncResult<Option<Digest>> {
        let state = self.db.table_states().get(table).await?;
        Ok(state.and_then(|s| s.table_digest()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::observer::{HookPoint, SyncEvent};
    use crate::registry::EntityValidator;
    use crate::source::{FileSource, MemorySource};
    use async_trait::async_trait;
    use seed_core::{record_digest, CoreError, SourceRecord};
    use seed_db::DbConfig;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    async fn database() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("CREATE TABLE palettes (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE colors (id INTEGER PRIMARY KEY, name TEXT NOT NULL, palette_id INTEGER)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db
    }

    async fn engine() -> SyncEngine {
        let registry = EntityRegistry::new()
            .with(EntityDescriptor::new("palettes"))
            .with(EntityDescriptor::new("colors"));
        SyncEngine::new(database().await, registry).with_observer(())
    }

    fn source(values: Vec<Value>) -> MemorySource {
        MemorySource::new(values)
    }

    async fn names(engine: &SyncEngine) -> Vec<(i64, String)> {
        sqlx::query_as("SELECT id, name FROM colors ORDER BY id")
            .fetch_all(engine.database().pool())
            .await
            .unwrap()
    }

    async fn ledger_of(engine: &SyncEngine, table: &str) -> HashMap<RecordId, Digest> {
        let id = engine.database().table_states().get(table).await.unwrap().unwrap().id;
        engine.database().ledger().digests(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_run_inserts_and_records_ledger() {
        let engine = engine().await;
        let values = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})];

        let report = engine
            .sync("colors", &source(values.clone()), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.inserted_count, 2);
        assert_eq!(report.updated_count, 0);
        assert_eq!(report.deleted_count, 0);

        // Every row's ledger entry is the digest of its source record
        let ledger = ledger_of(&engine, "colors").await;
        assert_eq!(ledger.len(), 2);
        for (i, value) in values.into_iter().enumerate() {
            let record = SourceRecord::from_value(i, value).unwrap();
            assert_eq!(ledger[&record.id()], record_digest(&record).unwrap());
        }
        assert!(engine.stored_digest("colors").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unchanged_source_is_skipped() {
        let engine = engine().await;
        let values = vec![json!({"id": 1, "name": "a"})];

        engine.sync("colors", &source(values.clone()), &SyncOptions::default()).await.unwrap();
        let report = engine
            .sync("colors", &source(values), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Skipped);
        assert_eq!(report.inserted_count + report.updated_count + report.deleted_count, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_unchanged_rows_are_not_written() {
        let engine = engine().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colors.json");

        tokio::fs::write(&path, r#"[{"id":1,"name":"a"},{"id":2,"name":"b"}]"#).await.unwrap();
        engine
            .sync("colors", &FileSource::new(&path), &SyncOptions::default())
            .await
            .unwrap();

        // Same records, different bytes: the run happens but writes nothing
        tokio::fs::write(&path, "[\n  {\"name\": \"a\", \"id\": 1},\n  {\"id\": 2, \"name\": \"b\"}\n]\n")
            .await
            .unwrap();
        let report = engine
            .sync("colors", &FileSource::new(&path), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.inserted_count, 0);
        assert_eq!(report.updated_count, 0);
        assert_eq!(report.actual_updated_count, 0);
    }

    #[tokio::test]
    async fn test_missing_ids_are_deleted_with_ledger_entries() {
        let engine = engine().await;
        let all = vec![
            json!({"id": 1, "name": "a"}),
            json!({"id": 2, "name": "b"}),
            json!({"id": 3, "name": "c"}),
        ];
        engine.sync("colors", &source(all.clone()), &SyncOptions::default()).await.unwrap();

        let report = engine
            .sync("colors", &source(all[..2].to_vec()), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.deleted_count, 1);
        assert_eq!(names(&engine).await.len(), 2);

        let ledger = ledger_of(&engine, "colors").await;
        assert!(!ledger.contains_key(&3));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_abort_before_any_write() {
        let engine = engine().await;
        engine
            .sync("colors", &source(vec![json!({"id": 1, "name": "a"})]), &SyncOptions::default())
            .await
            .unwrap();

        let dup = vec![
            json!({"id": 2, "name": "b"}),
            json!({"id": 2, "name": "c"}),
        ];
        let err = engine
            .sync("colors", &source(dup), &SyncOptions::default().truncate(true))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Core(CoreError::DuplicateIds { .. })));
        assert_eq!(names(&engine).await, vec![(1, "a".to_string())]);
        // The previous digest still stands
        assert!(engine.stored_digest("colors").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_record_blocks_digest_until_fixed() {
        let engine = engine().await;

        let broken = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": null})];
        let report = engine
            .sync("colors", &source(broken), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Error);
        assert_eq!(report.inserted_count, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].record_id, 2);
        assert!(engine.stored_digest("colors").await.unwrap().is_none());
        // The failed record has no ledger entry
        assert!(!ledger_of(&engine, "colors").await.contains_key(&2));

        let fixed = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})];
        let report = engine
            .sync("colors", &source(fixed), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.inserted_count, 1);
        assert_eq!(report.updated_count, 0);
        assert!(engine.stored_digest("colors").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_truncate_mode_rebuilds_table() {
        let engine = engine().await;
        let values = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})];
        engine.sync("colors", &source(values.clone()), &SyncOptions::default()).await.unwrap();

        let report = engine
            .sync("colors", &source(values), &SyncOptions::default().truncate(true))
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.inserted_count, 2);
        assert_eq!(report.deleted_count, 0);
        assert_eq!(ledger_of(&engine, "colors").await.len(), 2);
    }

    #[tokio::test]
    async fn test_force_mode_rechecks_every_row() {
        let engine = engine().await;
        let values = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})];
        engine.sync("colors", &source(values.clone()), &SyncOptions::default()).await.unwrap();

        // Drift behind the ledger's back
        sqlx::query("UPDATE colors SET name = 'drifted' WHERE id = 1")
            .execute(engine.database().pool())
            .await
            .unwrap();

        let report = engine
            .sync("colors", &source(values.clone()), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.result, SyncOutcome::Skipped);

        let report = engine
            .sync("colors", &source(values), &SyncOptions::default().force_update(true))
            .await
            .unwrap();
        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.updated_count, 2);
        assert_eq!(report.actual_updated_count, 1);
        assert_eq!(names(&engine).await[0], (1, "a".to_string()));

        let states = engine.database().table_states();
        assert!(!states.is_record_cache_disabled("colors").await.unwrap());
    }

    #[tokio::test]
    async fn test_force_rerun_keeps_stored_timestamps() {
        let db = database().await;
        sqlx::query(
            "CREATE TABLE visits (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
             seen_at DATETIME DEFAULT CURRENT_TIMESTAMP)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        let registry = EntityRegistry::new().with(EntityDescriptor::new("visits"));
        let engine = SyncEngine::new(db, registry).with_observer(());

        let values = vec![json!({"id": 1, "name": "a", "seen_at": null})];
        let report = engine.sync("visits", &source(values.clone()), &SyncOptions::default()).await.unwrap();
        assert_eq!(report.inserted_count, 1);

        // Pin the stamp so any rewrite by a later run would show
        sqlx::query("UPDATE visits SET seen_at = '2020-01-01 00:00:00' WHERE id = 1")
            .execute(engine.database().pool())
            .await
            .unwrap();

        let report = engine
            .sync("visits", &source(values), &SyncOptions::default().force_update(true))
            .await
            .unwrap();
        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.updated_count, 1);
        assert_eq!(report.actual_updated_count, 0);

        let seen_at: String = sqlx::query_scalar("SELECT seen_at FROM visits WHERE id = 1")
            .fetch_one(engine.database().pool())
            .await
            .unwrap();
        assert_eq!(seen_at, "2020-01-01 00:00:00");
    }

    #[tokio::test]
    async fn test_unique_collision_aborts_without_digest() {
        let db = database().await;
        sqlx::query("CREATE TABLE tags (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE)")
            .execute(db.pool())
            .await
            .unwrap();
        let registry = EntityRegistry::new().with(EntityDescriptor::new("tags"));
        let engine = SyncEngine::new(db, registry).with_observer(());

        // Both ids are new but share a code; the second insert is swallowed
        let values = vec![json!({"id": 1, "code": "x"}), json!({"id": 2, "code": "x"})];
        let err = engine
            .sync("tags", &source(values), &SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::IntegrityCount { expected: 2, actual: 1, .. }
        ));
        assert!(engine.stored_digest("tags").await.unwrap().is_none());

        let stored: Vec<i64> = sqlx::query_scalar("SELECT id FROM tags ORDER BY id")
            .fetch_all(engine.database().pool())
            .await
            .unwrap();
        assert_eq!(stored, vec![1]);
        let ledger = ledger_of(&engine, "tags").await;
        assert!(ledger.keys().all(|id| stored.contains(id)));
        assert!(!ledger.contains_key(&2));

        // The corrected file goes through
        let fixed = vec![json!({"id": 1, "code": "x"}), json!({"id": 2, "code": "y"})];
        let report = engine.sync("tags", &source(fixed), &SyncOptions::default()).await.unwrap();
        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.inserted_count, 1);
        assert_eq!(ledger_of(&engine, "tags").await.len(), 2);
        assert!(engine.stored_digest("tags").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_child_sync_invalidates_parent() {
        let registry = EntityRegistry::new()
            .with(EntityDescriptor::new("palettes"))
            .with(EntityDescriptor::new("colors").with_parent(ParentRelation::new("palettes")));
        let engine = SyncEngine::new(database().await, registry).with_observer(());

        let palettes = vec![json!({"id": 1, "name": "warm"}), json!({"id": 2, "name": "cold"})];
        engine.sync("palettes", &source(palettes.clone()), &SyncOptions::default()).await.unwrap();

        let colors = vec![
            json!({"id": 1, "name": "red", "palette_id": 1}),
            json!({"id": 2, "name": "grey"}),
        ];
        let report = engine
            .sync("colors", &source(colors), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(
            report.cascade,
            Some(CascadeReport { parent: "palettes".into(), ids: vec![1] })
        );

        let states = engine.database().table_states();
        let parent = states.get("palettes").await.unwrap().unwrap();
        assert!(parent.digest.is_none());
        assert!(parent.cache_disabled);

        // The parent's next run is not skipped, re-checks its rows and
        // restores the cache
        let report = engine
            .sync("palettes", &source(palettes), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.updated_count, 2);
        assert_eq!(report.actual_updated_count, 0);
        assert!(!states.is_record_cache_disabled("palettes").await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_change_defeats_skip() {
        let engine = engine().await;
        let values = vec![json!({"id": 1, "name": "a"})];
        engine.sync("colors", &source(values.clone()), &SyncOptions::default()).await.unwrap();

        sqlx::query("ALTER TABLE colors ADD COLUMN note TEXT")
            .execute(engine.database().pool())
            .await
            .unwrap();

        let report = engine
            .sync("colors", &source(values.clone()), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.result, SyncOutcome::Ok);
        assert_eq!(report.updated_count, 0);

        let report = engine
            .sync("colors", &source(values), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.result, SyncOutcome::Skipped);
    }

    struct NoGreen;

    #[async_trait]
    impl EntityValidator for NoGreen {
        async fn after_sync_validate(
            &self,
            db: &Database,
            _ids: &SyncedIds,
        ) -> SyncResult<Vec<Violation>> {
            let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM colors WHERE name = 'green'")
                .fetch_all(db.pool())
                .await
                .map_err(seed_db::DbError::from)?;
            Ok(ids
                .into_iter()
                .map(|id| Violation::for_record(id, "green is reserved"))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_post_validation_violation_marks_error() {
        let registry = EntityRegistry::new()
            .with(EntityDescriptor::new("colors").with_validator(Arc::new(NoGreen)));
        let engine = SyncEngine::new(database().await, registry).with_observer(());

        let report = engine
            .sync(
                "colors",
                &source(vec![json!({"id": 1, "name": "red"}), json!({"id": 2, "name": "green"})]),
                &SyncOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.result, SyncOutcome::Error);
        assert_eq!(report.violations, vec![Violation::for_record(2, "green is reserved")]);
        // Writes stay, digest does not
        assert_eq!(report.inserted_count, 2);
        assert!(engine.stored_digest("colors").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unregistered_table_is_rejected() {
        let engine = engine().await;
        let err = engine
            .sync("shapes", &source(vec![]), &SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownTable(name) if name == "shapes"));
    }

    #[tokio::test]
    async fn test_phase_hooks_fire_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let registry = EntityRegistry::new().with(EntityDescriptor::new("colors"));
        let engine = SyncEngine::new(database().await, registry)
            .with_observer(move |e: SyncEvent| sink.lock().unwrap().push(e));

        let values = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})];
        engine
            .sync("colors", &source(values), &SyncOptions::default().batch_size(1))
            .await
            .unwrap();

        let started: Vec<SyncPhase> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.point == HookPoint::Before)
            .map(|e| e.phase)
            .collect();
        assert_eq!(
            started,
            vec![
                SyncPhase::ReadingData,
                SyncPhase::Inserting,
                SyncPhase::InsertingChunk,
                SyncPhase::InsertingChunk,
                SyncPhase::InsertingDigests,
                SyncPhase::InsertingDigestsChunk,
                SyncPhase::InsertingDigestsChunk,
            ]
        );
    }

    #[test]
    fn test_parent_relation_resolution() {
        let plain = EntityDescriptor::new("colors");
        let declared = EntityDescriptor::new("colors")
            .with_parent(ParentRelation::new("palettes").with_foreign_key("scheme"));

        assert_eq!(SyncOptions::default().parent_relation(&plain), None);
        assert_eq!(
            SyncOptions::default().parent_relation(&declared).unwrap().foreign_key,
            "scheme"
        );

        let explicit = SyncOptions::default().parent_table("palettes");
        assert_eq!(explicit.parent_relation(&declared).unwrap().foreign_key, "scheme");

        let other = SyncOptions::default().parent_table("themes");
        assert_eq!(other.parent_relation(&declared).unwrap().foreign_key, "theme_id");
        assert_eq!(other.parent_relation(&plain).unwrap().table, "themes");
    }
}
