//! Public facade: owns the queue, the pool and the completion tracker for one processing session.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::pool::WorkerPool;
use super::queue::JobQueue;
use super::sink::ProgressSink;
use super::tracker::CompletionTracker;
use super::worker::worker_loop;
use super::{Shared, lock};
use crate::engine::TileCreator;
use crate::types::{DispatchOpts, DispatcherStats, Job, JobKey, JobOutcome, LifecycleState};
use crate::utils::config::{PackagePaths, WorkerThreadLimits};

type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Outcome channel of one session. The dispatcher holds the sender only until `start` hands
/// clones to the workers, so receivers end once every worker of the session has exited.
struct Session {
    tx: Option<Sender<JobOutcome>>,
    rx: Receiver<JobOutcome>,
}

impl Session {
    fn open() -> Self {
        let (tx, rx) = unbounded();
        Self { tx: Some(tx), rx }
    }
}

/// Parallel tile-generation dispatcher.
///
/// ```ignore
/// let d = Dispatcher::new(&opts, creator, Arc::new(NoProgress))?;
/// d.start()?;
/// for job in batch { d.submit(job.key, job.source); }
/// d.join()?;
/// ```
pub struct Dispatcher {
    shared: Arc<Shared>,
    thread_count: usize,
    lifecycle: Mutex<LifecycleState>,
    session: Mutex<Session>,
}

impl Dispatcher {
    /// Validate configuration and build an idle dispatcher. Fails before any worker exists when
    /// the thread count is zero or the output directory cannot be created.
    pub fn new(
        opts: &DispatchOpts,
        creator: Arc<dyn TileCreator>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let thread_count = match opts.thread_count {
            Some(0) => bail!("thread count must be greater than zero"),
            Some(n) => n,
            None => WorkerThreadLimits::current().default_pool_size(),
        };
        let output_dir = prepare_output_dir(&opts.output_dir)?;
        debug!(
            "dispatcher: {} workers, output {}",
            thread_count,
            output_dir.display()
        );

        let shared = Shared {
            queue: JobQueue::new(),
            tracker: CompletionTracker::new(output_dir, opts.total_expected, sink),
            pool: WorkerPool::new(),
            creator,
        };
        Ok(Self {
            shared: Arc::new(shared),
            thread_count,
            lifecycle: Mutex::new(LifecycleState::Idle),
            session: Mutex::new(Session::open()),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn output_dir(&self) -> &Path {
        self.shared.tracker.output_dir()
    }

    pub fn set_total_expected(&self, total: usize) {
        self.shared.tracker.set_total_expected(total);
    }

    /// Queue a job. Non-blocking. Returns false (and changes nothing) when a job with the same key
    /// is still pending.
    pub fn submit(&self, key: impl Into<JobKey>, source: impl Into<PathBuf>) -> bool {
        self.shared.queue.submit(Job::new(key, source))
    }

    /// Bring the pool up. No-op while workers are live.
    pub fn start(&self) -> Result<()> {
        self.start_with(|name, body| thread::Builder::new().name(name).spawn(body))
    }

    /// [`start`](Self::start) with the thread spawner supplied. If any worker fails to spawn, the
    /// ones already running are stopped and reaped, the pool is empty again and queued jobs stay
    /// queued for the next start.
    fn start_with<S>(&self, mut spawn: S) -> Result<()>
    where
        S: FnMut(String, WorkerBody) -> io::Result<JoinHandle<()>>,
    {
        let Some(ids) = self.shared.pool.enlist(self.thread_count) else {
            return Ok(());
        };
        self.shared.queue.resume();
        let tx = {
            let mut session = lock(&self.session);
            match session.tx.take() {
                Some(tx) => tx,
                None => {
                    let (tx, rx) = unbounded();
                    session.rx = rx;
                    tx
                }
            }
        };
        let prefix = PackagePaths::get().pkg_name();
        for (n, &id) in ids.iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let worker_tx = tx.clone();
            let body: WorkerBody = Box::new(move || worker_loop(id, shared, worker_tx));
            match spawn(format!("{prefix}-worker-{id}"), body) {
                Ok(handle) => self.shared.pool.adopt(handle),
                Err(e) => {
                    for &unspawned in &ids[n..] {
                        self.shared.pool.leave(unspawned);
                    }
                    self.stop_workers();
                    self.close_session();
                    self.set_state(LifecycleState::Idle);
                    return Err(e).context(format!("spawn tile worker {id}"));
                }
            }
        }
        self.set_state(LifecycleState::Running);
        debug!("started {} workers", self.thread_count);
        Ok(())
    }

    /// Phase one of [`join`](Self::join): block until every admitted job has been counted as
    /// completed. Needs a running pool.
    pub fn wait_for_completion(&self) {
        let queue = &self.shared.queue;
        self.shared.tracker.wait_for(|| queue.submitted());
    }

    /// [`wait_for_completion`](Self::wait_for_completion) bounded by `timeout`. True when every
    /// admitted job has been completed.
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> bool {
        let queue = &self.shared.queue;
        self.shared
            .tracker
            .wait_for_timeout(|| queue.submitted(), timeout)
    }

    /// Withdraw all jobs that no worker has picked up yet. Jobs in flight still finish; a
    /// following [`join`](Self::join) waits only for them.
    pub fn cancel_pending(&self) -> Vec<Job> {
        let discarded = self.shared.queue.discard_pending();
        if !discarded.is_empty() {
            debug!("withdrew {} pending jobs", discarded.len());
            self.shared.tracker.wake();
        }
        discarded
    }

    /// Drain, then stop. Blocks until every admitted job is completed, raises stop, wakes all
    /// workers and waits for the pool to empty. Returns to `Idle`; a second call is a no-op.
    pub fn join(&self) -> Result<()> {
        if self.shared.pool.is_empty() {
            if self.outstanding() == 0 {
                self.close_session();
                self.set_state(LifecycleState::Idle);
                return Ok(());
            }
            debug!(
                "join with {} outstanding jobs and no workers; starting pool",
                self.outstanding()
            );
            self.start()?;
        }

        self.wait_for_completion();
        self.set_state(LifecycleState::Draining);
        debug!("all {} jobs completed, stopping workers", self.submitted_count());

        self.stop_workers();
        self.close_session();
        self.set_state(LifecycleState::Idle);
        Ok(())
    }

    /// [`join`](Self::join), then forget all queued and completed state so the instance can take
    /// an independent batch.
    pub fn reset(&self) -> Result<()> {
        self.join()?;
        self.shared.queue.clear();
        self.shared.tracker.clear();
        self.shared.pool.reset_counters();
        debug!("dispatcher reset");
        Ok(())
    }

    /// Per-attempt outcomes of the current session (the next one when idle). The stream ends once
    /// the session's workers have exited; it cannot be replayed.
    pub fn outcomes(&self) -> Receiver<JobOutcome> {
        lock(&self.session).rx.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.lifecycle)
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool.size()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.pending_len()
    }

    pub fn submitted_count(&self) -> usize {
        self.shared.queue.submitted()
    }

    pub fn completed_count(&self) -> usize {
        self.shared.tracker.completed()
    }

    pub fn completed_outputs(&self) -> BTreeSet<PathBuf> {
        self.shared.tracker.completed_outputs()
    }

    pub fn is_pending(&self, key: &JobKey) -> bool {
        self.shared.queue.is_pending(key)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.shared.queue.submitted(),
            pending: self.shared.queue.pending_len(),
            dequeued: self.shared.queue.dequeued(),
            requeued: self.shared.queue.requeued(),
            completed: self.shared.tracker.completed(),
            pool_size: self.shared.pool.size(),
            resignations: self.shared.pool.resignations(),
        }
    }

    fn outstanding(&self) -> usize {
        self.submitted_count()
            .saturating_sub(self.shared.tracker.completed())
    }

    /// Raise stop, wait until every live worker has left, reap their threads and clear stop again.
    fn stop_workers(&self) {
        self.shared.queue.stop();
        self.shared.pool.wait_empty();
        for handle in self.shared.pool.take_handles() {
            if handle.join().is_err() {
                warn!("tile worker panicked during shutdown");
            }
        }
        self.shared.queue.resume();
    }

    fn set_state(&self, state: LifecycleState) {
        *lock(&self.lifecycle) = state;
    }

    /// Drop the finished session's sender (if it never started) and open the next one.
    fn close_session(&self) {
        *lock(&self.session) = Session::open();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Workers hold their own Arc; stop them so they do not outlive the facade.
        if !self.shared.pool.is_empty() {
            self.shared.queue.stop();
        }
    }
}

/// Create the output directory if absent; it must end up a directory.
fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    if dir.as_os_str().is_empty() {
        bail!("output directory is not set");
    }
    if dir.exists() && !dir.is_dir() {
        bail!("output path {} exists and is not a directory", dir.display());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create output directory {}", dir.display()))?;
    Ok(dir.to_path_buf())
}
