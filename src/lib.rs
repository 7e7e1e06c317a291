//! tilepool: parallel deep-zoom tile generation with a bounded, self-shrinking worker pool

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod plan;
pub mod run;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use dispatch::{Dispatcher, NoProgress, ProgressSink};
pub use engine::TileCreator;
pub use error::TileError;
pub use types::*;

use log::debug;
use std::sync::Arc;

/// Result alias used by public tilepool API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: tile every job of `batch` with `creator` and return the per-job outcomes.
///
/// Blocks until the batch is drained. Individual failures never make this return `Err`; they show
/// up in [`BatchSummary::failures`]. `Err` means the configuration was rejected (zero threads,
/// unusable output directory) or a worker thread could not be spawned.
///
/// ```ignore
/// let batch = vec![Job::new("a", "a.png")];
/// let opts = DispatchOpts { output_dir: "out".into(), thread_count: Some(4), ..Default::default() };
/// let summary = tilepool::generate_tiles(batch, &opts, Arc::new(my_tiler), Arc::new(NoProgress))?;
/// ```
pub fn generate_tiles(
    batch: Batch,
    opts: &DispatchOpts,
    creator: Arc<dyn TileCreator>,
    sink: Arc<dyn ProgressSink>,
) -> Result<BatchSummary> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    run::run_batch(batch, opts, creator, sink, None)
}

/// Default worker count for this machine: available threads times
/// [`MIN_THREADS_PER_CORE`](utils::WorkerThreadLimits::MIN_THREADS_PER_CORE).
pub fn default_thread_count() -> usize {
    utils::WorkerThreadLimits::current().default_pool_size()
}
