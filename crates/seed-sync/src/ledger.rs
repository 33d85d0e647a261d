//! # Ledger Upkeep
//!
//! Brings the digest ledger in line with the target table after the writes.
//!
//! ## Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. remove_waste     ledger ids − table ids      → delete entries      │
//! │  2. record           updated ids with an entry   → bulk CASE update    │
//! │                      updated ids without entry   ┐                     │
//! │                      inserted ids                ┘→ insert entries     │
//! │                                                                         │
//! │  Only ids that were written or verified reach step 2; a record that    │
//! │  failed validation keeps its old digest (or none) and is retried on    │
//! │  the next run.                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use seed_core::{Digest, RecordId};
use seed_db::DigestLedgerRepository;

use crate::error::SyncResult;
use crate::observer::{Progress, SyncObserver, SyncPhase};

/// Ledger writes for one table and run.
pub struct LedgerMaintainer<'a> {
    ledger: DigestLedgerRepository,
    seed_table_id: i64,
    table: &'a str,
    observer: &'a dyn SyncObserver,
    batch_size: usize,
}

/// Entry counts written by [`LedgerMaintainer::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerWrites {
    pub updated: usize,
    pub inserted: usize,
}

impl<'a> LedgerMaintainer<'a> {
    pub fn new(
        ledger: DigestLedgerRepository,
        seed_table_id: i64,
        table: &'a str,
        observer: &'a dyn SyncObserver,
        batch_size: usize,
    ) -> Self {
        LedgerMaintainer {
            ledger,
            seed_table_id,
            table,
            observer,
            batch_size: batch_size.max(1),
        }
    }

    /// Deletes entries whose record no longer exists in the table.
    ///
    /// ## Returns
    /// Number of entries removed.
    pub async fn remove_waste(&self, table_ids: &HashSet<RecordId>) -> SyncResult<u64> {
        let ledger_ids = self.ledger.record_ids(self.seed_table_id).await?;

        let mut waste: Vec<RecordId> = ledger_ids.difference(table_ids).copied().collect();
        if waste.is_empty() {
            return Ok(0);
        }
        waste.sort_unstable();

        let removed = self.ledger.delete_record_ids(self.seed_table_id, &waste).await?;
        debug!(table = %self.table, removed, "Removed waste ledger entries");
        Ok(removed)
    }

    /// Writes the digests of inserted and updated records.
    ///
    /// ## Arguments
    /// * `inserted` - ids written by the insert phase
    /// * `updated` - ids verified by the update phase
    /// * `digests` - fresh digests by id
    /// * `existing` - ledger digests loaded before the writes
    pub async fn record(
        &self,
        inserted: &[RecordId],
        updated: &[RecordId],
        digests: &HashMap<RecordId, Digest>,
        existing: &HashMap<RecordId, Digest>,
    ) -> SyncResult<LedgerWrites> {
        let mut replace: BTreeMap<RecordId, Digest> = BTreeMap::new();
        let mut create: Vec<(RecordId, Digest)> = Vec::new();

        for id in updated {
            let Some(digest) = digests.get(id) else { continue };
            if existing.contains_key(id) {
                replace.insert(*id, digest.clone());
            } else {
                create.push((*id, digest.clone()));
            }
        }
        for id in inserted {
            if let Some(digest) = digests.get(id) {
                create.push((*id, digest.clone()));
            }
        }

        let writes = LedgerWrites {
            updated: self.update_digests(&replace).await?,
            inserted: self.insert_digests(&create).await?,
        };

        debug!(
            table = %self.table,
            updated = writes.updated,
            inserted = writes.inserted,
            "Ledger updated"
        );
        Ok(writes)
    }

    async fn update_digests(&self, replace: &BTreeMap<RecordId, Digest>) -> SyncResult<usize> {
        if replace.is_empty() {
            return Ok(0);
        }

        let total = replace.len();
        self.observer.before(self.table, SyncPhase::UpdatingDigests, Progress::new(0, total));

        let entries: Vec<(&RecordId, &Digest)> = replace.iter().collect();
        let mut done = 0;
        for chunk in entries.chunks(self.batch_size) {
            self.observer.before(self.table, SyncPhase::UpdatingDigestsChunk, Progress::new(done, total));

            let part: BTreeMap<RecordId, Digest> =
                chunk.iter().map(|(id, d)| (**id, (*d).clone())).collect();
            self.ledger.bulk_update_digests(self.seed_table_id, &part).await?;

            done += chunk.len();
            self.observer.after(self.table, SyncPhase::UpdatingDigestsChunk, Progress::new(done, total));
        }

        self.observer.after(self.table, SyncPhase::UpdatingDigests, Progress::new(done, total));
        Ok(done)
    }

    async fn insert_digests(&self, create: &[(RecordId, Digest)]) -> SyncResult<usize> {
        if create.is_empty() {
            return Ok(0);
        }

        let total = create.len();
        self.observer.before(self.table, SyncPhase::InsertingDigests, Progress::new(0, total));

        let mut done = 0;
        for chunk in create.chunks(self.batch_size) {
            self.observer.before(self.table, SyncPhase::InsertingDigestsChunk, Progress::new(done, total));

            self.ledger.insert_digests(self.seed_table_id, chunk).await?;

            done += chunk.len();
            self.observer.after(self.table, SyncPhase::InsertingDigestsChunk, Progress::new(done, total));
        }

        self.observer.after(self.table, SyncPhase::InsertingDigests, Progress::new(done, total));
        Ok(done)
    }
}
