//! `<code>.json` snapshot files.

use crate::models::WorkSnapshot;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn snapshot_path(dir: &Path, code: &str) -> PathBuf {
    dir.join(format!("{}.json", code))
}

/// Write (or overwrite) a snapshot. Goes through a temp file + rename so a
/// reader never sees a half-written document.
pub fn write_snapshot(dir: &Path, snapshot: &WorkSnapshot) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create snapshot dir {:?}", dir))?;

    let path = snapshot_path(dir, &snapshot.code);
    let tmp = dir.join(format!("{}.json.tmp", snapshot.code));

    let body = serde_json::to_string_pretty(snapshot)
        .with_context(|| format!("serialize snapshot {}", snapshot.code))?;
    std::fs::write(&tmp, body).with_context(|| format!("write {:?}", tmp))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("rename into {:?}", path))?;

    debug!("Wrote {:?}", path);
    Ok(path)
}

pub fn read_snapshot(path: &Path) -> Result<WorkSnapshot> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let snap: WorkSnapshot =
        serde_json::from_str(&text).with_context(|| format!("parse {:?}", path))?;
    Ok(snap)
}

/// `RJ*.json` files in `dir`, sorted by file name. A missing dir is empty.
pub fn discover_snapshot_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_snapshot = path.is_file()
            && path.extension().is_some_and(|e| e == "json")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("RJ"));
        if is_snapshot {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
