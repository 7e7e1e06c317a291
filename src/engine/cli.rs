//! CLI command handler: tile by default; --dry-run prints the plan only.

use anyhow::Result;
use log::{debug, warn};

use crate::Opts;
use crate::engine::arg_parser::Cli;
use crate::plan::print_plan;
use crate::run::run_cli_batch;
use crate::utils::config::{DEFAULT_IMAGE_EXTENSIONS, PackagePaths};
use crate::utils::{apply_file_to_opts, load_tilepool_toml, setup_logging};

/// Defaults, then `.tilepool.toml` from the working directory, then CLI flags.
pub fn build_opts(cli: &Cli) -> Opts {
    let mut opts = Opts {
        input: cli.input.clone(),
        output_dir: Cli::default_output(),
        extensions: DEFAULT_IMAGE_EXTENSIONS
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ..Opts::default()
    };
    if let Some(file) = load_tilepool_toml(std::path::Path::new(".")) {
        debug!("applying {}", PackagePaths::get().config_filename());
        apply_file_to_opts(&file, &mut opts);
    }
    apply_cli_to_opts(cli, &mut opts);
    opts
}

fn apply_cli_to_opts(cli: &Cli, opts: &mut Opts) {
    if let Some(ref o) = cli.output {
        opts.output_dir = o.clone();
    }
    if cli.threads.is_some() {
        opts.num_threads = cli.threads;
    }
    if cli.tiler.is_some() {
        opts.tiler = cli.tiler.clone();
    }
    if !cli.extensions.is_empty() {
        opts.extensions = cli.extensions.clone();
    }
    if let Some(v) = cli.verbose {
        opts.verbose = v;
    }
    if let Some(v) = cli.skip_existing {
        opts.skip_existing = v;
    }
    if let Some(v) = cli.report {
        opts.write_report = v;
    }
    opts.dry_run = cli.dry_run;
}

/// Run the batch (default) or print the plan when --dry-run.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = build_opts(cli);
    setup_logging(opts.verbose);
    if opts.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NO TILES WILL BE WRITTEN.");
        print_plan(&opts)?;
        return Ok(());
    }
    let summary = run_cli_batch(&opts)?;
    if summary.cancelled > 0 {
        anyhow::bail!("cancelled with {} images not tiled", summary.cancelled);
    }
    if summary.failed > 0 || summary.dropped > 0 {
        anyhow::bail!(
            "{} of {} images were not tiled",
            summary.failed + summary.dropped,
            summary.processed()
        );
    }
    Ok(())
}
