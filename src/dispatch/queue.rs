//! FIFO submission queue with key dedup before admission.
//!
//! Dedup only looks at jobs still pending: once a job has been dequeued, the same key is admitted
//! again and processed as an independent unit.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use log::debug;

use super::{lock, wait_while};
use crate::types::{Job, JobKey};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// Admitted submissions this run. Requeues do not count.
    submitted: usize,
    dequeued: usize,
    requeued: usize,
    stopping: bool,
}

/// Pending jobs plus the stop flag workers wait on. One lock for all of it so a stop broadcast
/// can never slip between a worker's emptiness check and its wait.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `job` unless a pending job already has its key. Returns true when admitted.
    pub fn submit(&self, job: Job) -> bool {
        let mut st = lock(&self.state);
        if st.pending.iter().any(|p| p.key == job.key) {
            debug!("{} already queued, ignoring resubmission", job.key);
            return false;
        }
        st.pending.push_back(job);
        st.submitted += 1;
        drop(st);
        self.available.notify_one();
        true
    }

    /// Put a job back at the tail after its worker resigned. `submitted` is unchanged: the job
    /// was admitted once and still owes exactly one completion.
    pub fn requeue(&self, job: Job) {
        let mut st = lock(&self.state);
        st.pending.push_back(job);
        st.requeued += 1;
        drop(st);
        self.available.notify_one();
    }

    /// Block until a job is pending or stop is raised. Stop wins.
    pub fn next_job(&self) -> Option<Job> {
        let st = lock(&self.state);
        let mut st = wait_while(&self.available, st, |s| s.pending.is_empty() && !s.stopping);
        if st.stopping {
            return None;
        }
        let job = st.pending.pop_front();
        if job.is_some() {
            st.dequeued += 1;
        }
        job
    }

    /// Raise stop and wake every waiting worker.
    pub fn stop(&self) {
        lock(&self.state).stopping = true;
        self.available.notify_all();
    }

    /// Clear the stop flag so a fresh pool can drain the queue.
    pub fn resume(&self) {
        lock(&self.state).stopping = false;
    }

    /// Withdraw every pending job, including requeued ones. Withdrawn jobs no longer count as
    /// submitted, so a drain waits only for work already in flight.
    pub fn discard_pending(&self) -> Vec<Job> {
        let mut st = lock(&self.state);
        let discarded: Vec<Job> = st.pending.drain(..).collect();
        st.submitted = st.submitted.saturating_sub(discarded.len());
        discarded
    }

    /// Drop pending jobs and restart all counters.
    pub fn clear(&self) {
        let mut st = lock(&self.state);
        let stopping = st.stopping;
        *st = QueueState {
            stopping,
            ..QueueState::default()
        };
    }

    pub fn submitted(&self) -> usize {
        lock(&self.state).submitted
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn dequeued(&self) -> usize {
        lock(&self.state).dequeued
    }

    pub fn requeued(&self) -> usize {
        lock(&self.state).requeued
    }

    pub fn is_pending(&self, key: &JobKey) -> bool {
        lock(&self.state).pending.iter().any(|p| &p.key == key)
    }
}
