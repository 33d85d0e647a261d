//! # Batch Writer
//!
//! Applies the insert and update sets in chunks, one transaction per chunk.
//!
//! ## Per-Chunk Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  records ──chunks(batch_size)──►  for each record:                     │
//! │                                    convert ──► validate                │
//! │                                      │  ok          │ errors           │
//! │                                      ▼              ▼                  │
//! │                                  chunk rows     RecordFailure          │
//! │                                      │          (reported, skipped)    │
//! │                                      ▼                                  │
//! │                              ┌────────────────┐                        │
//! │                              │ one transaction│                        │
//! │                              └────────────────┘                        │
//! │                                                                         │
//! │  Inserts: row count read before the first and after the last chunk;   │
//! │           after != before + inserted → IntegrityCount                  │
//! │  Updates: only rows whose converted values differ are written          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use tracing::{debug, warn};

use seed_core::{FieldError, RecordId, Row, SourceRecord, ValueConverter};
use seed_db::TargetTableRepository;

use crate::error::{SyncError, SyncResult};
use crate::observer::{Progress, SyncObserver, SyncPhase};
use crate::registry::EntityValidator;

/// A record that was not written, with every reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub record_id: RecordId,
    pub errors: Vec<FieldError>,
}

/// Result of [`BatchWriter::insert_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub inserted_ids: Vec<RecordId>,
    pub failures: Vec<RecordFailure>,
}

/// Result of [`BatchWriter::update_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Records that converted and validated, whether or not they differed.
    pub updated_ids: Vec<RecordId>,
    /// Subset of `updated_ids` that was actually written.
    pub changed_ids: Vec<RecordId>,
    pub failures: Vec<RecordFailure>,
}

/// Writes records into one target table.
pub struct BatchWriter<'a> {
    target: &'a TargetTableRepository,
    converter: &'a ValueConverter<'a>,
    validator: &'a dyn EntityValidator,
    observer: &'a dyn SyncObserver,
    batch_size: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(
        target: &'a TargetTableRepository,
        converter: &'a ValueConverter<'a>,
        validator: &'a dyn EntityValidator,
        observer: &'a dyn SyncObserver,
        batch_size: usize,
    ) -> Self {
        BatchWriter {
            target,
            converter,
            validator,
            observer,
            batch_size: batch_size.max(1),
        }
    }

    /// Inserts new records.
    ///
    /// ## Returns
    /// * `Ok(InsertOutcome)` - ids written plus per-record failures
    /// * `Err(SyncError::IntegrityCount)` - row count after the last chunk
    ///   does not equal the count before plus the rows written
    pub async fn insert_batch(&self, records: &[&SourceRecord]) -> SyncResult<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let table = self.target.name();
        let total = records.len();
        self.observer.before(table, SyncPhase::Inserting, Progress::new(0, total));

        let before = self.target.count_consistent().await?;
        let mut done = 0;

        for chunk in records.chunks(self.batch_size) {
            self.observer.before(table, SyncPhase::InsertingChunk, Progress::new(done, total));

            let mut rows = Vec::with_capacity(chunk.len());
            let mut ids = Vec::with_capacity(chunk.len());
            for record in chunk {
                match self.prepare_insert(record) {
                    Ok(row) => {
                        ids.push(record.id());
                        rows.push(row);
                    }
                    Err(failure) => outcome.failures.push(failure),
                }
            }

            let written = self.target.insert_rows(&rows).await?;
            if written as usize != rows.len() {
                warn!(
                    table = %table,
                    expected = rows.len(),
                    written,
                    "Insert chunk skipped rows whose id already exists"
                );
            }
            outcome.inserted_ids.extend(ids);

            done += chunk.len();
            self.observer.after(table, SyncPhase::InsertingChunk, Progress::new(done, total));
        }

        let after = self.target.count_consistent().await?;
        let expected = before + outcome.inserted_ids.len() as i64;
        if after != expected {
            return Err(SyncError::IntegrityCount {
                table: table.to_string(),
                expected,
                actual: after,
            });
        }

        debug!(
            table = %table,
            inserted = outcome.inserted_ids.len(),
            failed = outcome.failures.len(),
            "Insert phase complete"
        );
        self.observer.after(table, SyncPhase::Inserting, Progress::new(done, total));
        Ok(outcome)
    }

    /// Updates existing records, writing only rows that differ from storage.
    pub async fn update_batch(&self, records: &[&SourceRecord]) -> SyncResult<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let table = self.target.name();
        let schema = self.converter.schema();
        let total = records.len();
        self.observer.before(table, SyncPhase::Updating, Progress::new(0, total));

        let mut done = 0;

        for chunk in records.chunks(self.batch_size) {
            self.observer.before(table, SyncPhase::UpdatingChunk, Progress::new(done, total));

            let ids: Vec<RecordId> = chunk.iter().map(|r| r.id()).collect();
            let stored = self.target.fetch_rows(schema, &ids).await?;

            let mut changes = Vec::new();
            for record in chunk {
                let Some(current) = stored.get(&record.id()) else {
                    debug!(table = %table, record_id = record.id(), "Row vanished before update, skipping");
                    continue;
                };
                match self.prepare_update(record, current) {
                    Ok(Some(row)) => {
                        outcome.updated_ids.push(record.id());
                        outcome.changed_ids.push(record.id());
                        changes.push((record.id(), row));
                    }
                    Ok(None) => outcome.updated_ids.push(record.id()),
                    Err(failure) => outcome.failures.push(failure),
                }
            }

            self.target.update_rows(&changes).await?;

            done += chunk.len();
            self.observer.after(table, SyncPhase::UpdatingChunk, Progress::new(done, total));
        }

        debug!(
            table = %table,
            updated = outcome.updated_ids.len(),
            changed = outcome.changed_ids.len(),
            failed = outcome.failures.len(),
            "Update phase complete"
        );
        self.observer.after(table, SyncPhase::Updating, Progress::new(done, total));
        Ok(outcome)
    }

    fn prepare_insert(&self, record: &SourceRecord) -> Result<Row, RecordFailure> {
        let row = self.converter.build_row(record).map_err(|errors| RecordFailure {
            record_id: record.id(),
            errors,
        })?;
        self.check(record, &row)?;
        Ok(row)
    }

    /// Returns the columns to write, or `None` when nothing changed.
    fn prepare_update(&self, record: &SourceRecord, current: &Row) -> Result<Option<Row>, RecordFailure> {
        let row = self
            .converter
            .build_update_row(record)
            .map_err(|errors| RecordFailure {
                record_id: record.id(),
                errors,
            })?;

        let mut merged = current.clone();
        merged.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.check(record, &merged)?;

        let changed = row.iter().any(|(column, value)| current.get(column) != Some(value));
        Ok(changed.then_some(row))
    }

    fn check(&self, record: &SourceRecord, row: &Row) -> Result<(), RecordFailure> {
        let errors = self.validator.validate(row, self.converter.schema());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RecordFailure {
                record_id: record.id(),
                errors,
            })
        }
    }
}
