//! # Reconciliation
//!
//! Classifies incoming records against the current store state.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Three-Way Reconciliation                             │
//! │                                                                         │
//! │  existing ids (table)        incoming ids (source)                     │
//! │  ┌───────────────┐           ┌───────────────┐                         │
//! │  │ 1  2  3       │           │ 1  2     4    │                         │
//! │  └───────────────┘           └───────────────┘                         │
//! │                                                                         │
//! │  deletion_set  = existing − incoming          → {3}                    │
//! │  to_insert     = incoming − existing          → {4}                    │
//! │  to_update     = both, ledger digest differs  → {2}   (if 2 changed)   │
//! │  unchanged     = both, ledger digest equal    → {1}   NO WRITE         │
//! │                                                                         │
//! │  Duplicate incoming ids abort everything before any classification.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::digest::record_digest;
use crate::error::{CoreError, CoreResult};
use crate::types::{Digest, RecordId, SourceRecord};

/// Outcome of [`reconcile`].
#[derive(Debug, Default)]
pub struct Reconciliation<'a> {
    /// Records whose id is not in the table yet.
    pub to_insert: Vec<&'a SourceRecord>,

    /// Records whose id exists but whose digest differs from the ledger.
    pub to_update: Vec<&'a SourceRecord>,

    /// Ids that exist with an identical digest.
    pub unchanged: Vec<RecordId>,

    /// Fresh digests of every record in `to_insert` and `to_update`.
    pub digests: HashMap<RecordId, Digest>,
}

/// Counts ids that occur more than once.
///
/// ## Returns
/// Offending id → number of occurrences. Empty when all ids are unique.
pub fn duplicate_ids(records: &[SourceRecord]) -> BTreeMap<RecordId, usize> {
    let mut counts: BTreeMap<RecordId, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.id()).or_insert(0) += 1;
    }
    counts.retain(|_, count| *count > 1);
    counts
}

/// Fails with `CoreError::DuplicateIds` if any id repeats.
pub fn ensure_unique_ids(records: &[SourceRecord]) -> CoreResult<()> {
    let ids = duplicate_ids(records);
    if ids.is_empty() {
        Ok(())
    } else {
        Err(CoreError::DuplicateIds { ids })
    }
}

/// Ids present in the table but missing from the source, sorted ascending.
pub fn deletion_set(existing_ids: &HashSet<RecordId>, incoming: &[SourceRecord]) -> Vec<RecordId> {
    let incoming_ids: HashSet<RecordId> = incoming.iter().map(SourceRecord::id).collect();

    let mut ids: Vec<RecordId> = existing_ids
        .iter()
        .filter(|id| !incoming_ids.contains(id))
        .copied()
        .collect();
    ids.sort_unstable();
    ids
}

/// Splits incoming records into insert / update / unchanged.
///
/// ## Arguments
/// * `existing_ids` - Ids currently in the target table
/// * `existing_digests` - Ledger digests by id
/// * `incoming` - Source records
///
/// ## Errors
/// `CoreError::DuplicateIds` when an id repeats; this is checked first.
pub fn reconcile<'a>(
    existing_ids: &HashSet<RecordId>,
    existing_digests: &HashMap<RecordId, Digest>,
    incoming: &'a [SourceRecord],
) -> CoreResult<Reconciliation<'a>> {
    ensure_unique_ids(incoming)?;

    let mut plan = Reconciliation::default();

    for record in incoming {
        let id = record.id();
        let digest = record_digest(record)?;

        if !existing_ids.contains(&id) {
            plan.to_insert.push(record);
            plan.digests.insert(id, digest);
        } else if existing_digests.get(&id) != Some(&digest) {
            plan.to_update.push(record);
            plan.digests.insert(id, digest);
        } else {
            plan.unchanged.push(id);
        }
    }

    Ok(plan)
}
