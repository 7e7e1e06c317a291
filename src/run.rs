//! Batch orchestration: feed a batch through a dispatcher and summarize the outcomes.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::dispatch::{Dispatcher, NoProgress, ProgressSink};
use crate::engine::manifest::load_batch;
use crate::engine::progress::{BarProgress, finish_bar};
use crate::engine::{CommandTileCreator, TileCreator};
use crate::plan::{log_plan, plan_batch};
use crate::types::{Batch, BatchSummary, DispatchOpts};
use crate::utils::Colors;
use crate::utils::config::PackagePaths;
use crate::Opts;

/// How often a draining run looks at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Submit `batch` to a fresh dispatcher, drain it and collect every outcome.
///
/// `cancel`: once set, no further jobs are submitted and queued jobs are withdrawn; jobs already
/// in flight finish and are reported. There is no way to abort a running tiler.
pub fn run_batch(
    batch: Batch,
    opts: &DispatchOpts,
    creator: Arc<dyn TileCreator>,
    sink: Arc<dyn ProgressSink>,
    cancel: Option<&AtomicBool>,
) -> Result<BatchSummary> {
    let batch_len = batch.len();
    let opts = DispatchOpts {
        total_expected: batch_len,
        ..opts.clone()
    };
    let dispatcher = Dispatcher::new(&opts, creator, sink)?;
    let outcomes = dispatcher.outcomes();
    dispatcher.start()?;

    let cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));
    for job in batch {
        if cancelled() {
            break;
        }
        dispatcher.submit(job.key, job.source);
    }
    debug!("submitted {} jobs, draining", dispatcher.submitted_count());

    let mut withdrawn = 0;
    if cancel.is_some() {
        while !dispatcher.wait_for_completion_timeout(CANCEL_POLL) {
            if cancelled() {
                withdrawn += dispatcher.cancel_pending().len();
            }
        }
    }
    let admitted = dispatcher.submitted_count();
    dispatcher.join()?;

    let mut summary = BatchSummary {
        submitted: admitted,
        ..BatchSummary::default()
    };
    // The session's senders are gone once join returns, so this ends.
    for outcome in outcomes.iter() {
        summary.record(outcome);
    }
    if cancelled() {
        summary.cancelled = batch_len.saturating_sub(admitted);
        warn!(
            "Cancelled: {} images not tiled ({} withdrawn from the queue)",
            summary.cancelled, withdrawn
        );
    }
    Ok(summary)
}

/// CLI path: load and plan the input, tile it with the configured command, report.
pub fn run_cli_batch(opts: &Opts) -> Result<BatchSummary> {
    let template = opts
        .tiler
        .as_deref()
        .context("no tiler configured: pass --tiler or set `tiler` in the settings file")?;
    let creator: Arc<dyn TileCreator> = Arc::new(CommandTileCreator::new(template)?);

    let batch = load_batch(&opts.input, &opts.extensions)?;
    let plan = plan_batch(batch, &opts.output_dir);
    log_plan(&plan);
    for job in &plan.missing_source {
        warn!("{}: source {} not found", job.key, job.source.display());
    }
    let to_submit = plan.into_submission(opts.skip_existing);

    let bar = opts.verbose.then(|| BarProgress::new(to_submit.len()));
    let sink: Arc<dyn ProgressSink> = match &bar {
        Some(b) => Arc::new(b.clone()),
        None => Arc::new(NoProgress),
    };

    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_requested_handler = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        // A second Ctrl+C does not wait for images in flight.
        if cancel_requested_handler.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        eprintln!("Cancelling: finishing images in flight, Ctrl+C again to quit now");
    })
    .context("set Ctrl+C handler")?;

    let summary = run_batch(
        to_submit,
        &DispatchOpts::from(opts),
        creator,
        sink,
        Some(&cancel_requested),
    )?;
    if let Some(b) = &bar {
        finish_bar(b.bar(), summary.processed());
    }
    log_summary(&summary);
    if opts.write_report {
        write_report(&summary, &opts.output_dir)?;
    }
    Ok(summary)
}

/// Summary line plus one warning per failed image.
pub fn log_summary(summary: &BatchSummary) {
    info!(
        "{} | {} | {} | {}",
        Colors::colorize(Colors::SUCCEEDED, &format!("Tiled: {}", summary.succeeded)),
        Colors::colorize(Colors::SKIPPED, &format!("Skipped: {}", summary.skipped)),
        Colors::colorize(Colors::FAILED, &format!("Failed: {}", summary.failed)),
        Colors::colorize(Colors::DROPPED, &format!("Dropped: {}", summary.dropped))
    );
    if summary.resigned > 0 {
        info!(
            "{} workers resigned after running out of memory",
            summary.resigned
        );
    }
    for (key, reason) in &summary.failures {
        warn!("{key}: {reason}");
    }
}

/// Write every outcome as JSON to the results file in `output_dir`.
pub fn write_report(summary: &BatchSummary, output_dir: &Path) -> Result<()> {
    let path = output_dir.join(PackagePaths::get().results_filename());
    let json = serde_json::to_string_pretty(summary).context("serialize batch report")?;
    std::fs::write(&path, json).with_context(|| format!("write report {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}
