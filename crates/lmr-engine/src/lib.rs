//! The sync engine: per-pair runner, scheduler and history sink.
//!
//! Control flow: [`Scheduler`] fires a tick per SyncPair, the tick invokes
//! [`PairRunner::run`], the runner loads both sides through the injected
//! clients, decides per entry between skip / conflict / mirror / create,
//! archives orphaned managed pages, and hands the outcome to
//! [`HistorySink`]. All state shared across runs lives behind the Storage
//! trait; the only in-process shared mutable state is the scheduler's job
//! table and the [`ActiveSet`].

mod error;
mod history;
mod plan;
mod runner;
mod scheduler;

pub use error::RunError;
pub use history::HistorySink;
pub use plan::GuardedAction;
pub use runner::{PairRunner, RunOutcome};
pub use scheduler::{Scheduler, SchedulerSnapshot};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Pair ids with a run in flight. A test-and-set here is what enforces
/// at-most-one-concurrent-run-per-pair; the scheduler also consults it to
/// skip ticks cooperatively.
#[derive(Clone, Default)]
pub struct ActiveSet {
    inner: Arc<Mutex<HashSet<i64>>>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a pair for a run. False means a run is already in flight.
    pub fn try_claim(&self, pair_id: i64) -> bool {
        self.inner.lock().expect("active set poisoned").insert(pair_id)
    }

    pub fn release(&self, pair_id: i64) {
        self.inner.lock().expect("active set poisoned").remove(&pair_id);
    }

    pub fn contains(&self, pair_id: i64) -> bool {
        self.inner
            .lock()
            .expect("active set poisoned")
            .contains(&pair_id)
    }

    pub fn snapshot(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .inner
            .lock()
            .expect("active set poisoned")
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Operator escape hatch: forget every in-flight claim WITHOUT stopping
    /// the runs that hold them. Unsafe by design — it opens a window where
    /// a duplicate run can start. Intended only for recovery from a stuck
    /// active set after a crash-restart.
    pub fn clear(&self) {
        self.inner.lock().expect("active set poisoned").clear();
    }
}
