//! Progress reporting contract. Best-effort: a failing sink never affects the batch.

use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::Result;
use log::warn;

/// Receives `(total, completed)` after every completion.
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, total: usize, completed: usize) -> Result<()>;
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) -> Result<()> + Send + Sync,
{
    fn report_progress(&self, total: usize, completed: usize) -> Result<()> {
        self(total, completed)
    }
}

/// Sink that discards every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report_progress(&self, _total: usize, _completed: usize) -> Result<()> {
        Ok(())
    }
}

/// Call the sink, swallowing both errors and panics.
pub(crate) fn report_best_effort(sink: &dyn ProgressSink, total: usize, completed: usize) {
    match catch_unwind(AssertUnwindSafe(|| sink.report_progress(total, completed))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("progress report {completed}/{total} failed: {e:#}"),
        Err(_) => warn!("progress sink panicked at {completed}/{total}"),
    }
}
