use crossbeam_channel::Sender;
use log::{debug, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use super::Shared;
use crate::TileError;
use crate::engine::TileCreator;
use crate::types::{Job, JobOutcome, JobStatus};

/// Single tile worker: take jobs until stop, run the creator, record completion.
/// Returns early (already out of the pool) when it resigns after an out-of-memory failure.
pub(crate) fn worker_loop(id: usize, shared: Arc<Shared>, outcomes: Sender<JobOutcome>) {
    debug!("worker {id} up");
    while let Some(job) = shared.queue.next_job() {
        let output = shared.tracker.output_path_for(&job.key);

        let status = if shared.tracker.contains(&output) {
            debug!("{} already produced this run, skipping", output.display());
            JobStatus::Skipped
        } else {
            match create_tiles(shared.creator.as_ref(), &job.source, &output) {
                Ok(()) => JobStatus::Succeeded,
                Err(e) if e.is_resource_exhausted() => {
                    if shared.pool.try_resign(id) {
                        warn!("worker {id} resigning after {e}; re-queueing {}", job.key);
                        emit(&outcomes, &job, &output, JobStatus::Resigned);
                        shared.queue.requeue(job);
                        return;
                    }
                    warn!("{e}; last live worker, dropping {}", job.key);
                    JobStatus::Dropped
                }
                Err(e) => {
                    debug!("{e}");
                    JobStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        };

        emit(&outcomes, &job, &output, status);
        shared.tracker.complete(&output);
    }
    shared.pool.leave(id);
    debug!("worker {id} stopped");
}

/// Run the creator; a panic inside it is an ordinary failure.
fn create_tiles(creator: &dyn TileCreator, source: &Path, output: &Path) -> Result<(), TileError> {
    match catch_unwind(AssertUnwindSafe(|| creator.create(source, output))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TileError::failed(source, format!("tile creator panicked: {msg}")))
        }
    }
}

fn emit(outcomes: &Sender<JobOutcome>, job: &Job, output: &Path, status: JobStatus) {
    // Nobody listening is fine.
    let _ = outcomes.send(JobOutcome {
        key: job.key.clone(),
        source: job.source.clone(),
        output: output.to_path_buf(),
        status,
    });
}
