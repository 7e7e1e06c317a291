pub mod config;
pub mod logger;
pub mod tilepool_toml;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use tilepool_toml::{apply_file_to_opts, load_tilepool_toml, parse_tilepool_toml};
