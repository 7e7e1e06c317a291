//! Progress bar sink for the CLI.

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

use crate::dispatch::ProgressSink;

/// Configuration for creating a progress bar
pub struct ProgressBarConfig {
    pub total: usize,
    pub desc: &'static str,
    pub animation: Animation,
}

impl ProgressBarConfig {
    pub fn new(total: usize, desc: &'static str, animation: Animation) -> Self {
        Self {
            total,
            desc,
            animation,
        }
    }
}

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a progress bar with the given configuration
pub fn create_progress_bar(config: ProgressBarConfig) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = config.total,
        desc = config.desc,
        animation = config.animation,
        unit = " images"
    )))
}

/// Move the bar to an absolute position. Uses try_lock so a worker never waits on the terminal;
/// a skipped update is caught up by the next one.
pub fn set_bar_position(pb: &ProgressBar, total: usize, completed: usize) {
    if let Ok(mut bar) = pb.try_lock() {
        bar.total = total;
        bar.counter = completed;
        let _ = bar.refresh();
    }
}

/// Final redraw after the batch, blocking so the last state is always shown.
pub fn finish_bar(pb: &ProgressBar, completed: usize) {
    if let Ok(mut bar) = pb.lock() {
        bar.counter = completed;
        let _ = bar.refresh();
        eprintln!();
    }
}

/// [`ProgressSink`] drawing on a kdam bar.
#[derive(Clone)]
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: usize) -> Self {
        Self {
            bar: create_progress_bar(ProgressBarConfig::new(
                total,
                crate::utils::ProgressConsts::BAR_DESC,
                Animation::Classic,
            )),
        }
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

impl ProgressSink for BarProgress {
    fn report_progress(&self, total: usize, completed: usize) -> anyhow::Result<()> {
        set_bar_position(&self.bar, total, completed);
        Ok(())
    }
}
