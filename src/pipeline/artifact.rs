//! Artifact file handling: naming, write-once persistence, inspection.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::ARTIFACT_SUFFIX;
use crate::models::ProcessedArtifact;

/// Prefix `tempfile` gives staging files; the watcher ignores dot-files.
const TEMP_PREFIX: &str = ".tmp";

/// `<stem>_processed.json` for a raw document path.
pub fn artifact_name(raw_path: &Path) -> Option<String> {
    let stem = raw_path.file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(format!("{stem}{ARTIFACT_SUFFIX}"))
}

pub fn artifact_path(raw_path: &Path, output_dir: &Path) -> Option<PathBuf> {
    artifact_name(raw_path).map(|name| output_dir.join(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another writer created the path first; nothing was overwritten.
    AlreadyExists,
}

/// Write `artifact` to `path` via a temp file in the same directory and a
/// no-clobber rename. A reader never sees a partial file at `path`.
pub fn write_artifact_atomic(path: &Path, artifact: &ProcessedArtifact) -> io::Result<WriteOutcome> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".json")
        .tempfile_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, artifact).map_err(io::Error::other)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(WriteOutcome::Written),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            // Dropping e.file removes the temp file.
            Ok(WriteOutcome::AlreadyExists)
        }
        Err(e) => Err(e.error),
    }
}

pub fn read_artifact(path: &Path) -> io::Result<ProcessedArtifact> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Remove staging files left behind by a crash mid-write. Returns count removed.
pub fn cleanup_orphaned_temp_files(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return 0, // Output dir may not exist yet
    };

    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(TEMP_PREFIX));
        if is_temp && path.is_file() && fs::remove_file(&path).is_ok() {
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!(dir = %dir.display(), files_cleaned = count, "Removed orphaned temp files");
    }
    count
}

// ──────────────────────────────────────────────
// Inspection
// ──────────────────────────────────────────────

/// Structural summary of an artifact-like JSON file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSummary {
    /// JSON type of the root value.
    pub root: &'static str,
    /// Top-level keys with the JSON type of each value.
    pub keys: Vec<(String, &'static str)>,
    pub source: Option<String>,
    pub model: Option<String>,
    pub record_count: Option<usize>,
    /// Record counts by `type`; `UNKNOWN` when absent.
    pub categories: BTreeMap<String, usize>,
    pub first_record: Option<Value>,
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn summarize_artifact(value: &Value) -> ArtifactSummary {
    let keys = match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), json_type(v))).collect(),
        _ => Vec::new(),
    };

    let meta_str = |key: &str| {
        value
            .get("meta")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let records = match value {
        Value::Array(items) => Some(items),
        _ => value.get("data").and_then(Value::as_array),
    };

    let mut categories = BTreeMap::new();
    if let Some(items) = records {
        for item in items {
            let category = item
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            *categories.entry(category).or_insert(0) += 1;
        }
    }

    ArtifactSummary {
        root: json_type(value),
        keys,
        source: meta_str("source"),
        model: meta_str("model"),
        record_count: records.map(Vec::len),
        categories,
        first_record: records.and_then(|items| items.first().cloned()),
    }
}

pub fn inspect_artifact(path: &Path) -> io::Result<ArtifactSummary> {
    let bytes = fs::read(path)?;
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(summarize_artifact(&value))
}
