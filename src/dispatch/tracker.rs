//! Completion set and progress: which outputs were produced this run, and how many completions
//! have been counted.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::sink::{ProgressSink, report_best_effort};
use super::{lock, wait_while};
use crate::types::JobKey;
use crate::utils::config::DESCRIPTOR_EXTENSION;

#[derive(Default)]
struct TrackerState {
    /// Output record -> times completed. A multiset: duplicate keys count once per completion.
    produced: HashMap<PathBuf, usize>,
    completed: usize,
    /// Highest count handed to the sink. Trails `completed` while a report is in flight.
    reported: usize,
}

pub struct CompletionTracker {
    output_dir: PathBuf,
    total_expected: AtomicUsize,
    sink: Arc<dyn ProgressSink>,
    state: Mutex<TrackerState>,
    settled: Condvar,
    /// Serializes sink calls. Never taken while `state` is held.
    report_turn: Mutex<()>,
}

impl CompletionTracker {
    pub fn new(output_dir: PathBuf, total_expected: usize, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            output_dir,
            total_expected: AtomicUsize::new(total_expected),
            sink,
            state: Mutex::new(TrackerState::default()),
            settled: Condvar::new(),
            report_turn: Mutex::new(()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `output_dir/<key>.dzi`. Deterministic, one path per key.
    pub fn output_path_for(&self, key: &JobKey) -> PathBuf {
        output_path_in(&self.output_dir, key)
    }

    pub fn set_total_expected(&self, total: usize) {
        self.total_expected.store(total, Ordering::Relaxed);
    }

    pub fn total_expected(&self) -> usize {
        self.total_expected.load(Ordering::Relaxed)
    }

    pub fn contains(&self, output: &Path) -> bool {
        lock(&self.state).produced.contains_key(output)
    }

    /// Record one completion for `output`, then report progress and wake the drain waiter.
    pub fn complete(&self, output: &Path) -> usize {
        let completed = {
            let mut st = lock(&self.state);
            *st.produced.entry(output.to_path_buf()).or_insert(0) += 1;
            st.completed += 1;
            st.completed
        };
        self.publish();
        completed
    }

    /// Report every count not yet reported, in order. The sink runs without the state lock, so it
    /// may read the dispatcher; the turn lock keeps reports strictly increasing.
    fn publish(&self) {
        let _turn = lock(&self.report_turn);
        let (from, to) = {
            let st = lock(&self.state);
            (st.reported, st.completed)
        };
        if to <= from {
            return;
        }
        let total = self.total_expected();
        for n in from + 1..=to {
            report_best_effort(self.sink.as_ref(), total, n);
        }
        lock(&self.state).reported = to;
        self.settled.notify_all();
    }

    pub fn completed(&self) -> usize {
        lock(&self.state).completed
    }

    /// Distinct outputs produced so far.
    pub fn completed_outputs(&self) -> BTreeSet<PathBuf> {
        lock(&self.state).produced.keys().cloned().collect()
    }

    /// Block until the reported completion count catches up with `submitted()`, so every
    /// completion has reached the sink before this returns. `submitted` is read under the tracker
    /// lock; callers that lower it must call [`wake`](Self::wake).
    pub fn wait_for<F>(&self, submitted: F)
    where
        F: Fn() -> usize,
    {
        let st = lock(&self.state);
        let _st = wait_while(&self.settled, st, |s| s.reported < submitted());
    }

    /// Like [`wait_for`](Self::wait_for) but gives up after `timeout`. True when drained.
    pub fn wait_for_timeout<F>(&self, submitted: F, timeout: Duration) -> bool
    where
        F: Fn() -> usize,
    {
        let st = lock(&self.state);
        let (st, _) = self
            .settled
            .wait_timeout_while(st, timeout, |s| s.reported < submitted())
            .unwrap_or_else(PoisonError::into_inner);
        st.reported >= submitted()
    }

    /// Wake drain waiters so they re-read `submitted()`.
    pub fn wake(&self) {
        let _st = lock(&self.state);
        self.settled.notify_all();
    }

    pub fn clear(&self) {
        *lock(&self.state) = TrackerState::default();
    }
}

/// Descriptor path for `key` under `output_dir`.
pub fn output_path_in(output_dir: &Path, key: &JobKey) -> PathBuf {
    output_dir.join(format!("{}.{}", key, DESCRIPTOR_EXTENSION))
}
