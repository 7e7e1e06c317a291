//! Batch planning: which jobs still need tiles and which already have a descriptor on disk.

use anyhow::Result;
use log::{debug, info};
use std::path::Path;

use crate::dispatch::output_path_in;
use crate::engine::manifest::{load_batch, validate_sources};
use crate::types::Batch;
use crate::utils::Colors;
use crate::Opts;

/// Result of comparing a batch to an output directory.
#[derive(Default)]
pub struct Plan {
    /// Jobs to submit, in batch order.
    pub pending: Batch,
    /// Jobs whose descriptor already exists.
    pub already_tiled: Batch,
    /// Jobs whose source image is missing.
    pub missing_source: Batch,
    /// For each job with a source, in batch order: whether it was already tiled.
    tiled_in_order: Vec<bool>,
}

impl Plan {
    pub fn total(&self) -> usize {
        self.pending.len() + self.already_tiled.len() + self.missing_source.len()
    }

    /// Jobs to submit, in batch order. Already tiled jobs are included unless `skip_existing`.
    pub fn into_submission(self, skip_existing: bool) -> Batch {
        if skip_existing {
            return self.pending;
        }
        let mut pending = self.pending.into_iter();
        let mut tiled = self.already_tiled.into_iter();
        self.tiled_in_order
            .iter()
            .filter_map(|&was_tiled| {
                if was_tiled {
                    tiled.next()
                } else {
                    pending.next()
                }
            })
            .collect()
    }
}

/// Split `batch` by whether `output_dir/<key>.dzi` exists. Missing sources are set aside first.
pub fn plan_batch(batch: Batch, output_dir: &Path) -> Plan {
    let (present, missing_source) = validate_sources(batch);
    let mut plan = Plan {
        missing_source,
        ..Plan::default()
    };
    for job in present {
        let was_tiled = output_path_in(output_dir, &job.key).is_file();
        plan.tiled_in_order.push(was_tiled);
        if was_tiled {
            plan.already_tiled.push(job);
        } else {
            plan.pending.push(job);
        }
    }
    plan
}

/// Load the input, plan it against the output directory and print the summary.
pub fn print_plan(opts: &Opts) -> Result<Plan> {
    let batch = load_batch(&opts.input, &opts.extensions)?;
    let plan = plan_batch(batch, &opts.output_dir);
    log_plan(&plan);
    if opts.verbose {
        for job in &plan.pending {
            eprintln!("  tile: {} <- {}", job.key, job.source.display());
        }
        for job in &plan.missing_source {
            eprintln!("  missing: {} <- {}", job.key, job.source.display());
        }
    }
    Ok(plan)
}

pub(crate) fn log_plan(plan: &Plan) {
    if plan.total() == 0 {
        info!("Nothing to tile.");
        return;
    }
    info!(
        "{} | {} | {}",
        Colors::colorize(Colors::SUCCEEDED, &format!("To tile: {}", plan.pending.len())),
        Colors::colorize(
            Colors::SKIPPED,
            &format!("Already tiled: {}", plan.already_tiled.len())
        ),
        Colors::colorize(
            Colors::FAILED,
            &format!("Missing source: {}", plan.missing_source.len())
        )
    );
    debug!("plan total {}", plan.total());
}
