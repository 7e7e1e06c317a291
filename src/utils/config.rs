//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    results_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
                results_filename: format!("{pkg}.results"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Optional settings file looked up in the working directory.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// JSON outcome report written into the output directory.
    pub fn results_filename(&self) -> &str {
        &self.results_filename
    }
}

// ---- Worker threads ----

/// Worker pool sizing.
/// Use [`WorkerThreadLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Available hardware threads (from rayon); set by [`WorkerThreadLimits::current()`].
    pub all_threads: usize,
    /// Workers per hardware thread. Tiling alternates decode I/O and CPU work, so the pool
    /// oversubscribes.
    pub per_core: usize,
}

impl Default for WorkerThreadLimits {
    fn default() -> Self {
        Self {
            all_threads: 0, // use current() to set from rayon
            per_core: Self::MIN_THREADS_PER_CORE,
        }
    }
}

impl WorkerThreadLimits {
    pub const MIN_THREADS_PER_CORE: usize = 5;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    /// Default pool size: every hardware thread times [`Self::MIN_THREADS_PER_CORE`], at least 1.
    pub fn default_pool_size(&self) -> usize {
        (self.all_threads * self.per_core).max(1)
    }
}

// ---- Output ----

/// Extension of the descriptor written next to each tile folder.
pub const DESCRIPTOR_EXTENSION: &str = "dzi";

/// Image extensions picked up when the input is a directory.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp", "gif"];

// ---- Progress ----

pub struct ProgressConsts;

impl ProgressConsts {
    pub const BAR_DESC: &'static str = "Tiling";
}
