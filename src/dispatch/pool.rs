//! Live worker membership. Size only shrinks mid-run (resignation) and drops to zero on stop.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;

use super::{lock, wait_while};

#[derive(Default)]
struct PoolState {
    live: BTreeSet<usize>,
    handles: Vec<JoinHandle<()>>,
    next_id: usize,
    resignations: usize,
}

#[derive(Default)]
pub struct WorkerPool {
    state: Mutex<PoolState>,
    emptied: Condvar,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` worker ids if the pool is empty. Returns None when workers are already
    /// live, which makes bring-up idempotent.
    pub fn enlist(&self, count: usize) -> Option<Vec<usize>> {
        let mut st = lock(&self.state);
        if !st.live.is_empty() {
            return None;
        }
        let first = st.next_id;
        st.next_id += count;
        let ids: Vec<usize> = (first..first + count).collect();
        st.live.extend(ids.iter().copied());
        Some(ids)
    }

    /// Keep the handle of a spawned worker so shutdown can reap it.
    pub fn adopt(&self, handle: JoinHandle<()>) {
        lock(&self.state).handles.push(handle);
    }

    /// Leave the pool for an out-of-memory episode, unless `id` is the last live worker.
    /// Check and removal happen under one lock so two workers cannot both resign the last seat.
    pub fn try_resign(&self, id: usize) -> bool {
        let mut st = lock(&self.state);
        if st.live.len() <= 1 || !st.live.remove(&id) {
            return false;
        }
        st.resignations += 1;
        drop(st);
        self.emptied.notify_all();
        true
    }

    /// Leave the pool on stop (or failed spawn).
    pub fn leave(&self, id: usize) {
        lock(&self.state).live.remove(&id);
        self.emptied.notify_all();
    }

    pub fn size(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn resignations(&self) -> usize {
        lock(&self.state).resignations
    }

    pub fn reset_counters(&self) {
        lock(&self.state).resignations = 0;
    }

    /// Block until no worker is live.
    pub fn wait_empty(&self) {
        let st = lock(&self.state);
        let _st = wait_while(&self.emptied, st, |s| !s.live.is_empty());
    }

    pub fn take_handles(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut lock(&self.state).handles)
    }
}
