//! tilepool CLI: tile a batch of images; use --dry-run to see the plan without tiling.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use tilepool::engine::{Cli, handle_run};

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
