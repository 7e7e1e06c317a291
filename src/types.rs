//! Public and internal types for the tilepool API and dispatcher.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Opaque job identifier. Output descriptors are named after it, so it must be filesystem-safe.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One unit of tile-generation work. Two jobs with the same key are the same job for dedup,
/// whatever their source paths.
#[derive(Clone, Debug)]
pub struct Job {
    pub key: JobKey,
    pub source: PathBuf,
}

impl Job {
    pub fn new(key: impl Into<JobKey>, source: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
        }
    }
}

/// A batch as loaded from a manifest or directory: `(key, source)` pairs in submission order.
pub type Batch = Vec<Job>;

/// How one processing attempt of a job ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// The tile creator returned successfully.
    Succeeded,
    /// Output was already produced in this run; the creator was not called.
    Skipped,
    /// The creator failed (or panicked). Counted as processed, not retried.
    Failed { reason: String },
    /// Out of memory with other workers alive: the worker left the pool and the job was re-queued.
    /// Not a completion.
    Resigned,
    /// Out of memory on the last live worker: counted as processed without output.
    Dropped,
}

impl JobStatus {
    /// True for every status that counts toward the completion set.
    pub fn is_completion(&self) -> bool {
        !matches!(self, JobStatus::Resigned)
    }
}

/// Per-attempt record emitted on the outcome stream.
#[derive(Clone, Debug, Serialize)]
pub struct JobOutcome {
    pub key: JobKey,
    pub source: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub status: JobStatus,
}

/// Dispatcher lifecycle: `Idle -> Running -> Draining -> Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Draining,
}

/// Point-in-time counters for a dispatcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: usize,
    pub pending: usize,
    pub dequeued: usize,
    pub requeued: usize,
    pub completed: usize,
    pub pool_size: usize,
    pub resignations: usize,
}

/// Lib options for [`Dispatcher::new`](crate::dispatch::Dispatcher::new).
#[derive(Clone, Debug, Default)]
pub struct DispatchOpts {
    /// Directory receiving `<key>.dzi` descriptors. Created if absent.
    pub output_dir: PathBuf,
    /// Worker count. When None, `available threads * MIN_THREADS_PER_CORE`.
    pub thread_count: Option<usize>,
    /// Batch size for progress reporting only; does not gate completion.
    pub total_expected: usize,
}

/// Full options (CLI). Use [`DispatchOpts`] for lib.
#[derive(Clone, Debug, Default)]
pub struct Opts {
    /// Manifest file or directory of source images.
    pub input: PathBuf,
    /// Output directory for descriptors and tile folders.
    pub output_dir: PathBuf,
    /// Override worker thread count.
    pub num_threads: Option<usize>,
    /// External tiler command template (`{src}`, `{dst}`, `{dst_stem}`).
    pub tiler: Option<String>,
    /// Image extensions taken from a directory scan.
    pub extensions: Vec<String>,
    /// Show progress bar and debug logs.
    pub verbose: bool,
    /// Print the plan and do not start workers.
    pub dry_run: bool,
    /// Leave out jobs whose descriptor already exists in the output directory.
    pub skip_existing: bool,
    /// Write every outcome to the results file in the output directory.
    pub write_report: bool,
}

impl From<&Opts> for DispatchOpts {
    fn from(o: &Opts) -> Self {
        DispatchOpts {
            output_dir: o.output_dir.clone(),
            thread_count: o.num_threads,
            total_expected: 0,
        }
    }
}

/// Aggregated outcomes of one batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchSummary {
    pub submitted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub resigned: usize,
    pub dropped: usize,
    /// Jobs of the batch never processed because the run was cancelled.
    pub cancelled: usize,
    /// `(key, reason)` for every failed attempt.
    pub failures: Vec<(JobKey, String)>,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: JobOutcome) {
        match &outcome.status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Failed { reason } => {
                self.failed += 1;
                self.failures.push((outcome.key.clone(), reason.clone()));
            }
            JobStatus::Resigned => self.resigned += 1,
            JobStatus::Dropped => self.dropped += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Attempts that counted toward completion.
    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed + self.dropped
    }
}
