//! # Phase Hooks
//!
//! Observers are told before and after every phase of a run, and around
//! every chunk of the chunked phases.
//!
//! ## Phase Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reading_data                                                          │
//! │  truncating | disabling_record_cache          (mode dependent)         │
//! │  deleting                                                              │
//! │  inserting          ┐                                                   │
//! │    inserting_chunk  ┘ × ceil(n / batch_size)                           │
//! │  updating           ┐                                                   │
//! │    updating_chunk   ┘ × ceil(n / batch_size)                           │
//! │  updating_digests   ┐                                                   │
//! │    updating_digests_chunk                                               │
//! │  inserting_digests  ┐                                                   │
//! │    inserting_digests_chunk                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any `Fn(SyncEvent)` closure is an observer; `()` ignores everything.

use std::fmt;

use serde::Serialize;
use tracing::debug;

/// A step of a sync run that observers can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Truncating,
    DisablingRecordCache,
    ReadingData,
    Deleting,
    Inserting,
    InsertingChunk,
    Updating,
    UpdatingChunk,
    UpdatingDigests,
    UpdatingDigestsChunk,
    InsertingDigests,
    InsertingDigestsChunk,
}

impl SyncPhase {
    /// Snake-case name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Truncating => "truncating",
            SyncPhase::DisablingRecordCache => "disabling_record_cache",
            SyncPhase::ReadingData => "reading_data",
            SyncPhase::Deleting => "deleting",
            SyncPhase::Inserting => "inserting",
            SyncPhase::InsertingChunk => "inserting_chunk",
            SyncPhase::Updating => "updating",
            SyncPhase::UpdatingChunk => "updating_chunk",
            SyncPhase::UpdatingDigests => "updating_digests",
            SyncPhase::UpdatingDigestsChunk => "updating_digests_chunk",
            SyncPhase::InsertingDigests => "inserting_digests",
            SyncPhase::InsertingDigestsChunk => "inserting_digests_chunk",
        }
    }

    /// Returns true for the per-chunk phases.
    pub fn is_chunk(&self) -> bool {
        matches!(
            self,
            SyncPhase::InsertingChunk
                | SyncPhase::UpdatingChunk
                | SyncPhase::UpdatingDigestsChunk
                | SyncPhase::InsertingDigestsChunk
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative progress within a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Items processed so far.
    pub done: usize,
    /// Items in the phase.
    pub total: usize,
}

impl Progress {
    pub fn new(done: usize, total: usize) -> Self {
        Progress { done, total }
    }
}

/// Whether a hook fires before or after its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    Before,
    After,
}

/// A hook invocation, as passed to closure observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEvent {
    pub table: String,
    pub point: HookPoint,
    pub phase: SyncPhase,
    pub progress: Progress,
}

/// Receives phase hooks.
pub trait SyncObserver: Send + Sync {
    fn before(&self, table: &str, phase: SyncPhase, progress: Progress);
    fn after(&self, table: &str, phase: SyncPhase, progress: Progress);
}

impl<F> SyncObserver for F
where
    F: Fn(SyncEvent) + Send + Sync,
{
    fn before(&self, table: &str, phase: SyncPhase, progress: Progress) {
        self(SyncEvent {
            table: table.to_string(),
            point: HookPoint::Before,
            phase,
            progress,
        });
    }

    fn after(&self, table: &str, phase: SyncPhase, progress: Progress) {
        self(SyncEvent {
            table: table.to_string(),
            point: HookPoint::After,
            phase,
            progress,
        });
    }
}

impl SyncObserver for () {
    fn before(&self, _table: &str, _phase: SyncPhase, _progress: Progress) {}
    fn after(&self, _table: &str, _phase: SyncPhase, _progress: Progress) {}
}

/// Logs every hook at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn before(&self, table: &str, phase: SyncPhase, progress: Progress) {
        if !phase.is_chunk() {
            debug!(table = %table, phase = %phase, total = progress.total, "Phase started");
        }
    }

    fn after(&self, table: &str, phase: SyncPhase, progress: Progress) {
        if phase.is_chunk() {
            debug!(
                table = %table,
                phase = %phase,
                done = progress.done,
                total = progress.total,
                "Chunk finished"
            );
        } else {
            debug!(table = %table, phase = %phase, done = progress.done, "Phase finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_observer_receives_events() {
        let events = Mutex::new(Vec::new());
        let observer = |event: SyncEvent| events.lock().unwrap().push(event);

        observer.before("colors", SyncPhase::Inserting, Progress::new(0, 3));
        observer.after("colors", SyncPhase::Inserting, Progress::new(3, 3));

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].point, HookPoint::Before);
        assert_eq!(events[1].progress, Progress::new(3, 3));
        assert_eq!(events[1].table, "colors");
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(SyncPhase::DisablingRecordCache.to_string(), "disabling_record_cache");
        assert_eq!(
            serde_json::to_string(&SyncPhase::UpdatingDigestsChunk).unwrap(),
            "\"updating_digests_chunk\""
        );
        assert!(SyncPhase::InsertingChunk.is_chunk());
        assert!(!SyncPhase::Deleting.is_chunk());
    }
}
