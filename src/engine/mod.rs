//! Engine module: collaborators and CLI plumbing around the dispatcher

pub mod arg_parser;
pub mod cli;
pub mod creator;
pub mod manifest;
pub mod progress;

// Re-export commonly used items
pub use arg_parser::Cli;
pub use cli::{build_opts, handle_run};
pub use creator::{
    CommandTileCreator, TileCreator, classify_output, classify_spawn_error, mentions_oom,
};
pub use manifest::{load_batch, parse_manifest, scan_directory, validate_sources};
pub use progress::BarProgress;
