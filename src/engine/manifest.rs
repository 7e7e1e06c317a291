//! Batch loading: manifest files (JSON or TOML) or a directory of images.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::types::{Batch, Job};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    key: String,
    source: PathBuf,
}

/// JSON manifests: either `{"key": "path", ...}` or `[{"key": ..., "source": ...}, ...]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonManifest {
    Map(BTreeMap<String, PathBuf>),
    List(Vec<ManifestEntry>),
}

/// TOML manifests: `[[job]]` tables with `key` and `source`.
#[derive(Debug, Deserialize)]
struct TomlManifest {
    #[serde(default)]
    job: Vec<ManifestEntry>,
}

/// Load a batch from `input`: a directory is scanned for images, a `.json` or `.toml` file is
/// parsed as a manifest. Relative sources in a manifest resolve against the manifest's directory.
pub fn load_batch(input: &Path, extensions: &[String]) -> Result<Batch> {
    if input.is_dir() {
        return scan_directory(input, extensions);
    }
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("read manifest {}", input.display()))?;
    let base = input.parent().unwrap_or(Path::new("."));
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let entries = match ext.as_deref() {
        Some("json") => parse_json_manifest(&text)?,
        Some("toml") => parse_toml_manifest(&text)?,
        _ => bail!(
            "unsupported manifest {}: expected a directory, .json or .toml",
            input.display()
        ),
    };
    Ok(entries
        .into_iter()
        .map(|e| Job::new(e.key, resolve(base, e.source)))
        .collect())
}

fn parse_json_manifest(text: &str) -> Result<Vec<ManifestEntry>> {
    let manifest: JsonManifest = serde_json::from_str(text).context("parse JSON manifest")?;
    Ok(match manifest {
        JsonManifest::Map(m) => m
            .into_iter()
            .map(|(key, source)| ManifestEntry { key, source })
            .collect(),
        JsonManifest::List(v) => v,
    })
}

fn parse_toml_manifest(text: &str) -> Result<Vec<ManifestEntry>> {
    let manifest: TomlManifest = toml::from_str(text).context("parse TOML manifest")?;
    Ok(manifest.job)
}

/// Parse manifest text without touching the filesystem. `format` is `json` or `toml`.
pub fn parse_manifest(text: &str, format: &str) -> Result<Batch> {
    let entries = match format {
        "json" => parse_json_manifest(text)?,
        "toml" => parse_toml_manifest(text)?,
        other => bail!("unknown manifest format {other}"),
    };
    Ok(entries
        .into_iter()
        .map(|e| Job::new(e.key, e.source))
        .collect())
}

fn resolve(base: &Path, source: PathBuf) -> PathBuf {
    if source.is_absolute() {
        source
    } else {
        base.join(source)
    }
}

/// Walk `root` for files whose extension is in `extensions` (case-insensitive). Key = file stem.
/// Sorted by path so submission order is stable.
pub fn scan_directory(root: &Path, extensions: &[String]) -> Result<Batch> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if entry.file_type().is_file() && has_image_extension(entry.path(), extensions) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    debug!("found {} images under {}", paths.len(), root.display());
    Ok(paths
        .into_iter()
        .filter_map(|p| {
            let key = p.file_stem()?.to_str()?.to_string();
            Some(Job::new(key, p))
        })
        .collect())
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Split a batch into jobs whose source exists and jobs whose source is missing. Order is kept.
pub fn validate_sources(batch: Batch) -> (Batch, Batch) {
    batch.into_par_iter().partition(|job| job.source.is_file())
}
