//! Load `.tilepool.toml` from a directory (CLI only). Lib callers pass [`DispatchOpts`](crate::DispatchOpts) directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::Opts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct TilepoolToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    output_dir: Option<String>,
    threads: Option<usize>,
    tiler: Option<String>,
    extensions: Option<Vec<String>>,
    verbose: Option<bool>,
    skip_existing: Option<bool>,
    report: Option<bool>,
}

/// Load the settings file from `dir` if present. Returns None if missing or unparsable (logged).
pub fn load_tilepool_toml(dir: &Path) -> Option<TilepoolToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_tilepool_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

pub fn parse_tilepool_toml(s: &str) -> Result<TilepoolToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($idx:expr, $opts:expr, $idx_field:ident => $opts_field:ident) => {
        if let Some(v) = $idx.$idx_field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
/// `dry_run` is never read from the file.
pub fn apply_file_to_opts(file: &TilepoolToml, opts: &mut Opts) {
    let s = &file.settings;
    if let Some(ref p) = s.output_dir {
        opts.output_dir = PathBuf::from(p);
    }
    if let Some(n) = s.threads {
        opts.num_threads = Some(n);
    }
    if let Some(ref t) = s.tiler {
        opts.tiler = Some(t.clone());
    }
    if let Some(ref v) = s.extensions {
        opts.extensions = v.clone();
    }
    apply_file_opt!(s, opts, verbose => verbose);
    apply_file_opt!(s, opts, skip_existing => skip_existing);
    apply_file_opt!(s, opts, report => write_report);
}
