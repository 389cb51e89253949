//! Pipeline orchestrator: ties queue → scraper → snapshots → storage together.
//!
//! ## Run modes
//!
//! `scrape_new()`: drop already-seen codes from the "new" list, scrape what is
//!   left (with images), move the successes to "seen", ingest.
//!
//! `refresh_seen()`: re-scrape every "seen" code without images and ingest.
//!   Idempotent: re-running replaces rows by code, nothing accumulates.
//!
//! `run()`: both of the above; codes scraped as new are not refreshed again
//!   in the same pass.

use crate::config::AppConfig;
use crate::ingest::{ingest_dir, IngestStats};
use crate::media::MediaDownloader;
use crate::models::{ScrapeOptions, StaticInfo, WorkSnapshot};
use crate::queue::CodeQueue;
use crate::scraper::http_client::random_delay;
use crate::scraper::{CatalogSource, DlsiteScraper};
use crate::snapshot::write_snapshot;
use crate::storage::Repository;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Everything one code needs, cheap to clone into a task.
#[derive(Clone)]
struct WorkProcessor {
    source: Arc<dyn CatalogSource>,
    media: Option<Arc<MediaDownloader>>,
    raw_dir: PathBuf,
}

impl WorkProcessor {
    /// Fetch both sources and write `<code>.json`. `Ok(false)` when neither
    /// source produced anything; `Err` only when the snapshot can't be written.
    async fn save_work(&self, code: &str, opts: ScrapeOptions) -> Result<bool> {
        info!("Processing: {}", code);

        let static_info = self.source.fetch_static(code).await;
        let dynamic_info = if opts.static_only {
            None
        } else {
            self.source.fetch_dynamic(code).await
        };

        if static_info.is_none() && dynamic_info.is_none() {
            warn!("[{}] Failed to fetch any data", code);
            return Ok(false);
        }
        if static_info.as_ref().is_some_and(StaticInfo::is_empty) {
            warn!("[{}] Item page had no recognizable fields", code);
        }

        let snapshot = WorkSnapshot::new(
            code,
            static_info.unwrap_or_default(),
            dynamic_info.unwrap_or_default(),
        );
        let path = write_snapshot(&self.raw_dir, &snapshot)?;

        if opts.download_media {
            if let Some(media) = &self.media {
                media
                    .download(
                        code,
                        snapshot.dynamic_info.work_image.as_deref(),
                        &snapshot.static_info.media,
                        &snapshot.static_info.desc_images,
                    )
                    .await;
            }
        }

        info!("[{}] Saved {:?}", code, path);
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub processed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub codes_attempted: usize,
    pub snapshots_written: usize,
    pub failures: usize,
    pub ingest: Option<IngestStats>,
}

impl PipelineStats {
    fn absorb(&mut self, other: PipelineStats) {
        self.codes_attempted += other.codes_attempted;
        self.snapshots_written += other.snapshots_written;
        self.failures += other.failures;
        if other.ingest.is_some() {
            self.ingest = other.ingest;
        }
    }
}

pub struct Pipeline {
    config: AppConfig,
    worker: WorkProcessor,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Result<Self> {
        let source = Arc::new(DlsiteScraper::new(&config).context("Failed to build scraper")?);
        let media = Arc::new(MediaDownloader::new(&config).context("Failed to build downloader")?);
        Ok(Self::with_source(config, source).with_media(media))
    }

    pub fn with_source(config: AppConfig, source: Arc<dyn CatalogSource>) -> Self {
        let worker = WorkProcessor {
            source,
            media: None,
            raw_dir: config.paths.raw_data_dir.clone(),
        };
        Self { config, worker }
    }

    pub fn with_media(mut self, media: Arc<MediaDownloader>) -> Self {
        self.worker.media = Some(media);
        self
    }

    pub fn queue(&self) -> CodeQueue {
        CodeQueue::from_paths(&self.config.paths)
    }

    /// Scrape `codes` with at most `pipeline.concurrency` in flight, pausing a
    /// random interval between codes. Codes start in input order. Stops
    /// dispatching at the first fatal error.
    pub async fn scrape_codes(&self, codes: &[String], opts: ScrapeOptions) -> Result<ScrapeOutcome> {
        let sem = Arc::new(Semaphore::new(self.config.concurrency()));
        let aborted = Arc::new(AtomicBool::new(false));
        let (delay_min, delay_max) = (
            self.config.scraper.code_delay_min_ms,
            self.config.scraper.code_delay_max_ms,
        );
        let mut handles = Vec::new();

        for (i, code) in codes.iter().enumerate() {
            // Permit first, so tasks start in input order.
            let permit = Arc::clone(&sem).acquire_owned().await?;
            if aborted.load(Ordering::SeqCst) {
                break;
            }

            let task_code = code.clone();
            let worker = self.worker.clone();
            let aborted = Arc::clone(&aborted);
            let is_last = i + 1 == codes.len();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let saved = match worker.save_work(&task_code, opts).await {
                    Ok(saved) => saved,
                    Err(e) => {
                        aborted.store(true, Ordering::SeqCst);
                        return Err(e);
                    }
                };
                if !is_last {
                    random_delay(delay_min, delay_max).await;
                }
                Ok::<bool, anyhow::Error>(saved)
            });

            handles.push((code.clone(), handle));
        }

        let mut outcome = ScrapeOutcome::default();
        let mut fatal = None;

        for (code, handle) in handles {
            match handle.await {
                Ok(Ok(true)) => outcome.processed.push(code),
                Ok(Ok(false)) => outcome.failed.push(code),
                Ok(Err(e)) => {
                    error!("{}: {:#}", code, e);
                    if fatal.is_none() {
                        fatal = Some(e.context(format!("scraping {}", code)));
                    }
                }
                Err(e) => {
                    error!("Task panic for {}: {}", code, e);
                    outcome.failed.push(code);
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    pub fn ingest(&self) -> Result<IngestStats> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }
        ingest_dir(&repo, &self.config.paths.raw_data_dir)
    }

    pub async fn scrape_new(&self) -> Result<PipelineStats> {
        let queue = self.queue();
        queue.dedupe_new_vs_seen()?;

        let pending = queue.pending()?;
        if pending.is_empty() {
            info!("No codes in {:?}", self.config.paths.new_codes_file);
            return Ok(PipelineStats::default());
        }

        info!("=== Scraping {} new code(s) ===", pending.len());
        let opts = ScrapeOptions {
            download_media: true,
            static_only: false,
        };
        let outcome = self.scrape_codes(&pending, opts).await?;
        queue.mark_processed(&outcome.processed)?;

        let ingest = if outcome.processed.is_empty() {
            None
        } else {
            Some(self.ingest()?)
        };

        Ok(PipelineStats {
            codes_attempted: pending.len(),
            snapshots_written: outcome.processed.len(),
            failures: outcome.failed.len(),
            ingest,
        })
    }

    pub async fn refresh_seen(&self) -> Result<PipelineStats> {
        self.refresh_codes(self.queue().seen()?).await
    }

    async fn refresh_codes(&self, codes: Vec<String>) -> Result<PipelineStats> {
        if codes.is_empty() {
            info!("No codes in {:?}", self.config.paths.seen_codes_file);
            return Ok(PipelineStats::default());
        }

        info!("=== Refreshing {} seen code(s) ===", codes.len());
        let outcome = self.scrape_codes(&codes, ScrapeOptions::default()).await?;
        let ingest = self.ingest()?;

        Ok(PipelineStats {
            codes_attempted: codes.len(),
            snapshots_written: outcome.processed.len(),
            failures: outcome.failed.len(),
            ingest: Some(ingest),
        })
    }

    pub async fn run(&self) -> Result<PipelineStats> {
        let queue = self.queue();
        let already_seen = queue.seen()?;

        let mut stats = self.scrape_new().await?;
        stats.absorb(self.refresh_codes(already_seen).await?);

        info!(
            "=== Done: {} attempted | {} snapshots | {} failures ===",
            stats.codes_attempted, stats.snapshots_written, stats.failures
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DynamicInfo, StaticInfo};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct FakeSource {
        statics: HashMap<String, StaticInfo>,
        dynamics: HashMap<String, DynamicInfo>,
        dynamic_calls: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CatalogSource for FakeSource {
        async fn fetch_static(&self, code: &str) -> Option<StaticInfo> {
            self.started.lock().unwrap().push(code.to_string());
            self.statics.get(code).cloned()
        }
        async fn fetch_dynamic(&self, code: &str) -> Option<DynamicInfo> {
            self.dynamic_calls.fetch_add(1, Ordering::SeqCst);
            self.dynamics.get(code).cloned()
        }
    }

    fn config(dir: &TempDir) -> AppConfig {
        let mut cfg = AppConfig::default();
        let root = dir.path();
        cfg.paths.raw_data_dir = root.join("data/raw");
        cfg.paths.image_root = root.join("images");
        cfg.paths.public_data_dir = root.join("data/public");
        cfg.paths.new_codes_file = root.join("codes/New_Code.txt");
        cfg.paths.seen_codes_file = root.join("codes/Update_Code.txt");
        cfg.storage.db_path = root.join("data/cache/asmr.duckdb");
        cfg.scraper.code_delay_min_ms = 0;
        cfg.scraper.code_delay_max_ms = 0;
        cfg
    }

    fn titled(title: &str) -> StaticInfo {
        StaticInfo {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    fn priced(price: i64) -> DynamicInfo {
        DynamicInfo {
            price: Some(price),
            ..Default::default()
        }
    }

    #[test]
    fn test_both_sources_failing_writes_nothing() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        let raw = cfg.paths.raw_data_dir.clone();
        let pipeline = Pipeline::with_source(cfg, Arc::new(FakeSource::default()));

        let saved =
            tokio_test::block_on(pipeline.worker.save_work("RJ1", ScrapeOptions::default())).unwrap();
        assert!(!saved);
        assert!(!raw.join("RJ1.json").exists());
    }

    #[tokio::test]
    async fn test_dynamic_only_snapshot_is_kept_and_ingested() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        let mut source = FakeSource::default();
        source.dynamics.insert("RJ1".into(), priced(550));
        let pipeline = Pipeline::with_source(cfg, Arc::new(source));

        assert!(pipeline.worker.save_work("RJ1", ScrapeOptions::default()).await.unwrap());
        let stats = pipeline.ingest().unwrap();
        assert_eq!(stats.works, 1);
        assert_eq!(stats.stats, 1);
    }

    #[tokio::test]
    async fn test_static_only_skips_dynamic_fetch() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        let source = Arc::new(FakeSource {
            statics: HashMap::from([("RJ1".to_string(), titled("t"))]),
            dynamics: HashMap::from([("RJ1".to_string(), priced(1))]),
            ..Default::default()
        });
        let pipeline = Pipeline::with_source(cfg, source.clone());

        let opts = ScrapeOptions {
            download_media: false,
            static_only: true,
        };
        assert!(pipeline.worker.save_work("RJ1", opts).await.unwrap());
        assert_eq!(source.dynamic_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scrape_new_moves_successes_and_keeps_failures() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        std::fs::create_dir_all(dir.path().join("codes")).unwrap();
        std::fs::write(&cfg.paths.new_codes_file, "RJ2\nRJ1\nRJ3\nRJ9\n").unwrap();
        std::fs::write(&cfg.paths.seen_codes_file, "RJ9\n").unwrap();

        let source = FakeSource {
            statics: HashMap::from([
                ("RJ1".to_string(), titled("one")),
                ("RJ2".to_string(), titled("two")),
            ]),
            dynamics: HashMap::from([("RJ2".to_string(), priced(990))]),
            ..Default::default()
        };
        let pipeline = Pipeline::with_source(cfg.clone(), Arc::new(source));

        let stats = pipeline.scrape_new().await.unwrap();
        assert_eq!(stats.codes_attempted, 3);
        assert_eq!(stats.snapshots_written, 2);
        assert_eq!(stats.failures, 1);
        let ingest = stats.ingest.unwrap();
        assert_eq!((ingest.works, ingest.stats), (2, 1));

        let queue = pipeline.queue();
        assert_eq!(queue.pending().unwrap(), vec!["RJ3"]);
        assert_eq!(queue.seen().unwrap(), vec!["RJ1", "RJ2", "RJ9"]);
        assert!(!cfg.paths.raw_data_dir.join("RJ3.json").exists());
    }

    #[tokio::test]
    async fn test_run_does_not_refresh_freshly_scraped_codes() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        std::fs::create_dir_all(dir.path().join("codes")).unwrap();
        std::fs::write(&cfg.paths.new_codes_file, "RJ1\n").unwrap();
        std::fs::write(&cfg.paths.seen_codes_file, "RJ5\n").unwrap();

        let source = Arc::new(FakeSource {
            statics: HashMap::from([
                ("RJ1".to_string(), titled("new")),
                ("RJ5".to_string(), titled("old")),
            ]),
            ..Default::default()
        });
        let pipeline = Pipeline::with_source(cfg, source.clone());

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.codes_attempted, 2);
        assert_eq!(stats.snapshots_written, 2);
        assert_eq!(source.dynamic_calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.ingest.unwrap().works, 2);
    }

    #[tokio::test]
    async fn test_unwritable_snapshot_dir_is_fatal() {
        let dir = tempdir().unwrap();
        let mut cfg = config(&dir);
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        cfg.paths.raw_data_dir = blocker.join("raw");

        let source = FakeSource {
            statics: HashMap::from([("RJ1".to_string(), titled("t"))]),
            ..Default::default()
        };
        let source = Arc::new(source);
        let pipeline = Pipeline::with_source(cfg, source.clone());
        let codes: Vec<String> = ["RJ1", "RJ2", "RJ3"].map(String::from).to_vec();
        assert!(pipeline
            .scrape_codes(&codes, ScrapeOptions::default())
            .await
            .is_err());
        assert_eq!(*source.started.lock().unwrap(), vec!["RJ1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sequential_scrape_keeps_input_order() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        let codes: Vec<String> = (1..=8).rev().map(|n| format!("RJ{}", n)).collect();
        let source = Arc::new(FakeSource {
            statics: codes.iter().map(|c| (c.clone(), titled(c))).collect(),
            ..Default::default()
        });
        let pipeline = Pipeline::with_source(cfg, source.clone());

        let outcome = pipeline
            .scrape_codes(&codes, ScrapeOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.processed, codes);
        assert_eq!(*source.started.lock().unwrap(), codes);
    }
}
