use clap::Parser;
use std::path::PathBuf;

struct DefaultArgs;

impl DefaultArgs {
    pub const INPUT: &'static str = ".";
    pub const OUTPUT: &'static str = "tiles";
}

/// Parallel deep-zoom tile generation.
#[derive(Clone, Parser)]
#[command(name = "tilepool")]
#[command(about = "Tile a batch of images into deep-zoom pyramids; use --dry-run to see the plan.")]
pub struct Cli {
    /// Manifest (.json / .toml) or directory of images. Default: current directory.
    #[arg(value_name = "INPUT", default_value = DefaultArgs::INPUT)]
    pub input: PathBuf,

    /// Output directory for descriptors and tiles. Created if absent.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Worker threads. Default: available threads x 5.
    #[arg(long, short = 't', value_parser = clap::value_parser!(usize))]
    pub threads: Option<usize>,

    /// Tiler command template, e.g. "vips dzsave {src} {dst_stem}".
    #[arg(long)]
    pub tiler: Option<String>,

    /// Image extensions taken from a directory input. Can specify multiple: -e png tif
    #[arg(long, short = 'e', num_args = 1..)]
    pub extensions: Vec<String>,

    /// Verbose output and progress bar.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Print what would be tiled; start no workers.
    #[arg(long)]
    pub dry_run: bool,

    /// Leave out images whose descriptor already exists in the output directory.
    #[arg(long, short = 's', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub skip_existing: Option<bool>,

    /// Write every outcome to tilepool.results (JSON) in the output directory.
    #[arg(long, short = 'r', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub report: Option<bool>,
}

impl Cli {
    pub fn default_output() -> PathBuf {
        PathBuf::from(DefaultArgs::OUTPUT)
    }
}
