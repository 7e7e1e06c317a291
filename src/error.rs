//! Error types for tile creation.
//!
//! The dispatcher only distinguishes two failure kinds: memory exhaustion, which drives worker
//! resignation, and everything else, which is absorbed as a failed job.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a [`TileCreator`](crate::engine::TileCreator).
#[derive(Error, Debug)]
pub enum TileError {
    /// The conversion ran out of memory. Under parallel load this is treated as concurrency
    /// pressure: the worker leaves the pool and the job is re-queued.
    #[error("out of memory while tiling {}: {detail}", .source_path.display())]
    ResourceExhausted { source_path: PathBuf, detail: String },

    /// Any other failure. Not retried.
    #[error("tiling {} failed: {reason}", .source_path.display())]
    Failed { source_path: PathBuf, reason: String },

    /// I/O around the conversion (spawning the tiler, creating directories).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TileError {
    pub fn exhausted(source_path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        TileError::ResourceExhausted {
            source_path: source_path.into(),
            detail: detail.into(),
        }
    }

    pub fn failed(source_path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TileError::Failed {
            source_path: source_path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, TileError::ResourceExhausted { .. })
    }
}
