//! Pending / seen code lists kept as plain text, one code per line.

use crate::config::PathsConfig;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CODE_PREFIX: &str = "RJ";

pub fn is_work_code(s: &str) -> bool {
    s.starts_with(CODE_PREFIX)
}

/// Codes in `path`, trimmed, sorted and deduplicated. Non-code lines are
/// ignored and a missing file reads as empty.
pub fn load(path: &Path) -> Result<Vec<String>> {
    Ok(load_set(path)?.into_iter().collect())
}

fn load_set(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| is_work_code(l))
        .map(str::to_string)
        .collect())
}

fn save(path: &Path, codes: &BTreeSet<String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let mut body = codes.iter().cloned().collect::<Vec<_>>().join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(path, body).with_context(|| format!("write {:?}", path))
}

/// The "new" and "seen" lists. Only decides what gets fetched next; never
/// touches snapshots or the store.
pub struct CodeQueue {
    new_path: PathBuf,
    seen_path: PathBuf,
}

impl CodeQueue {
    pub fn new(new_path: impl Into<PathBuf>, seen_path: impl Into<PathBuf>) -> Self {
        Self {
            new_path: new_path.into(),
            seen_path: seen_path.into(),
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(&paths.new_codes_file, &paths.seen_codes_file)
    }

    pub fn pending(&self) -> Result<Vec<String>> {
        load(&self.new_path)
    }

    pub fn seen(&self) -> Result<Vec<String>> {
        load(&self.seen_path)
    }

    /// Drop already-seen codes from "new" and rewrite both lists normalized.
    /// Returns how many codes were dropped.
    pub fn dedupe_new_vs_seen(&self) -> Result<usize> {
        let new = load_set(&self.new_path)?;
        let seen = load_set(&self.seen_path)?;

        let remaining: BTreeSet<String> = new.difference(&seen).cloned().collect();
        let removed = new.len() - remaining.len();

        save(&self.new_path, &remaining)?;
        save(&self.seen_path, &seen)?;

        info!(
            "Removed {} code(s) already present in {:?}",
            removed, self.seen_path
        );
        Ok(removed)
    }

    /// Move `codes` from "new" to "seen".
    pub fn mark_processed(&self, codes: &[String]) -> Result<()> {
        let mut new = load_set(&self.new_path)?;
        let mut seen = load_set(&self.seen_path)?;

        for code in codes.iter().map(|c| c.trim()).filter(|c| is_work_code(c)) {
            new.remove(code);
            seen.insert(code.to_string());
        }

        save(&self.new_path, &new)?;
        save(&self.seen_path, &seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn queue(dir: &Path, new: &str, seen: &str) -> CodeQueue {
        let q = CodeQueue::new(dir.join("codes/New_Code.txt"), dir.join("codes/Update_Code.txt"));
        std::fs::create_dir_all(dir.join("codes")).unwrap();
        std::fs::write(dir.join("codes/New_Code.txt"), new).unwrap();
        std::fs::write(dir.join("codes/Update_Code.txt"), seen).unwrap();
        q
    }

    #[test]
    fn test_load_filters_trims_and_sorts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.txt");
        std::fs::write(&path, "  RJ3 \n# comment\nRJ1\n\nRJ3\nVJ9\n").unwrap();
        assert_eq!(load(&path).unwrap(), vec!["RJ1", "RJ3"]);
        assert!(load(&dir.path().join("missing.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_dedupe_makes_sets_disjoint_without_losing_codes() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "RJ2\nRJ1\nRJ2\nRJ5\n", "RJ5\nRJ9\nRJ9\n");

        let before: BTreeSet<String> =
            q.pending().unwrap().into_iter().chain(q.seen().unwrap()).collect();

        let removed = q.dedupe_new_vs_seen().unwrap();
        assert_eq!(removed, 1);

        let new = q.pending().unwrap();
        let seen = q.seen().unwrap();
        assert_eq!(new, vec!["RJ1", "RJ2"]);
        assert_eq!(seen, vec!["RJ5", "RJ9"]);
        assert!(new.iter().all(|c| !seen.contains(c)));

        let after: BTreeSet<String> = new.into_iter().chain(seen).collect();
        assert_eq!(before, after);

        let raw = std::fs::read_to_string(dir.path().join("codes/Update_Code.txt")).unwrap();
        assert_eq!(raw, "RJ5\nRJ9\n");
    }

    #[test]
    fn test_mark_processed_moves_codes() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "RJ1\nRJ2\n", "RJ9\n");
        q.mark_processed(&["RJ2".to_string()]).unwrap();
        assert_eq!(q.pending().unwrap(), vec!["RJ1"]);
        assert_eq!(q.seen().unwrap(), vec!["RJ2", "RJ9"]);
    }

    #[test]
    fn test_empty_list_written_as_empty_file() {
        let dir = tempdir().unwrap();
        let q = queue(dir.path(), "RJ1\n", "RJ1\n");
        q.dedupe_new_vs_seen().unwrap();
        let raw = std::fs::read_to_string(dir.path().join("codes/New_Code.txt")).unwrap();
        assert_eq!(raw, "");
    }
}
