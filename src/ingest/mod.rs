//! Snapshot directory → works/stats tables.

use crate::models::WorkSnapshot;
use crate::snapshot::{discover_snapshot_files, read_snapshot};
use crate::storage::Repository;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub files: usize,
    /// Distinct codes upserted into `works`
    pub works: usize,
    /// Distinct codes given a `stats` row
    pub stats: usize,
    pub skipped: usize,
}

/// Parse every snapshot in `dir` (file-name order) and upsert the lot in one
/// transaction. Unreadable files or files without a code are skipped.
pub fn ingest_dir(repo: &Repository, dir: &Path) -> Result<IngestStats> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create snapshot dir {:?}", dir))?;

    let files = discover_snapshot_files(dir)?;
    info!("Found {} snapshot files in {:?}", files.len(), dir);

    let mut stats = IngestStats {
        files: files.len(),
        ..Default::default()
    };

    let mut snapshots: Vec<WorkSnapshot> = Vec::with_capacity(files.len());
    for path in &files {
        match read_snapshot(path) {
            Ok(snap) if snap.code.trim().is_empty() => {
                warn!("Skipping {:?}: no code", path);
                stats.skipped += 1;
            }
            Ok(snap) => snapshots.push(snap),
            Err(e) => {
                warn!("Skipping {:?}: {:#}", path, e);
                stats.skipped += 1;
            }
        }
    }

    let mut works: HashSet<&str> = HashSet::new();
    let mut with_stats: HashSet<&str> = HashSet::new();

    let tx = repo.begin()?;
    for snap in &snapshots {
        debug!("Ingesting {}", snap.code);
        works.insert(&snap.code);
        if repo.upsert_snapshot(&tx, snap)? {
            with_stats.insert(&snap.code);
        }
    }
    tx.commit().context("Ingest commit failed")?;

    stats.works = works.len();
    stats.stats = with_stats.len();

    info!(
        "Ingestion complete: {} works, {} stats, {} skipped",
        stats.works, stats.stats, stats.skipped
    );
    Ok(stats)
}
