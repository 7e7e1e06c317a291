//! Tile creation contract and the external-command tiler used by the CLI.

use log::debug;
use std::io;
use std::path::Path;
use std::process::{Command, Output};

use crate::TileError;

/// Cuts one source image into a tile pyramid and writes its descriptor to `target`.
/// Called concurrently from worker threads, always with distinct `target` paths per key.
pub trait TileCreator: Send + Sync {
    fn create(&self, source: &Path, target: &Path) -> Result<(), TileError>;
}

impl<F> TileCreator for F
where
    F: Fn(&Path, &Path) -> Result<(), TileError> + Send + Sync,
{
    fn create(&self, source: &Path, target: &Path) -> Result<(), TileError> {
        self(source, target)
    }
}

/// Substrings in tiler stderr that mean the conversion ran out of memory.
const OOM_MARKERS: &[&str] = &[
    "out of memory",
    "cannot allocate memory",
    "memory allocation failed",
    "std::bad_alloc",
];

/// Runs an external tiler per job, e.g. `vips dzsave {src} {dst_stem}`.
///
/// Placeholders: `{src}` source image, `{dst}` descriptor path, `{dst_stem}` descriptor path
/// without its extension. The template is split on whitespace; no shell is involved.
#[derive(Clone, Debug)]
pub struct CommandTileCreator {
    program: String,
    args: Vec<String>,
}

impl CommandTileCreator {
    pub fn new(template: &str) -> anyhow::Result<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("tiler command template is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders filled in for one job.
    pub fn expand_args(&self, source: &Path, target: &Path) -> Vec<String> {
        let src = source.to_string_lossy();
        let dst = target.to_string_lossy();
        let stem = target.with_extension("");
        let dst_stem = stem.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{src}", &src)
                    .replace("{dst_stem}", &dst_stem)
                    .replace("{dst}", &dst)
            })
            .collect()
    }
}

impl TileCreator for CommandTileCreator {
    fn create(&self, source: &Path, target: &Path) -> Result<(), TileError> {
        let args = self.expand_args(source, target);
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| classify_spawn_error(source, e))?;
        classify_output(source, &output)
    }
}

/// A tiler that cannot even be launched for lack of memory is resource exhaustion too.
pub fn classify_spawn_error(source: &Path, err: io::Error) -> TileError {
    if err.kind() == io::ErrorKind::OutOfMemory {
        return TileError::exhausted(source, err.to_string());
    }
    TileError::Io(err)
}

/// Map a finished tiler process to the dispatcher's error taxonomy.
pub fn classify_output(source: &Path, output: &Output) -> Result<(), TileError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if killed_by_oom_killer(output) || mentions_oom(&stderr) {
        return Err(TileError::exhausted(source, stderr));
    }
    let reason = match output.status.code() {
        Some(code) if stderr.is_empty() => format!("tiler exited with status {code}"),
        Some(code) => format!("tiler exited with status {code}: {stderr}"),
        None => format!("tiler terminated by signal: {stderr}"),
    };
    Err(TileError::failed(source, reason))
}

pub fn mentions_oom(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    OOM_MARKERS.iter().any(|m| lower.contains(m))
}

/// The Linux OOM killer ends the child with SIGKILL.
#[cfg(unix)]
fn killed_by_oom_killer(output: &Output) -> bool {
    use std::os::unix::process::ExitStatusExt;
    output.status.signal() == Some(9)
}

#[cfg(not(unix))]
fn killed_by_oom_killer(_output: &Output) -> bool {
    false
}
