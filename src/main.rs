mod catalog;
mod config;
mod ingest;
mod media;
mod models;
mod pipeline;
mod queue;
mod scraper;
mod server;
mod snapshot;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::models::ScrapeOptions;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::queue::CodeQueue;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "asmr-catalog", about = "DLsite work scraper, catalog store and read API", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Apply schema migrations
    Migrate,

    /// Drop codes from the "new" list that are already in the "seen" list
    Dedupe,

    /// Scrape queued new codes (with images), mark them seen, ingest
    ScrapeNew,

    /// Re-scrape every seen code without images, then ingest
    Update,

    /// dedupe + scrape-new + update
    Run,

    /// Scrape specific codes into snapshots (queue files untouched)
    Scrape {
        #[arg(required = true)]
        codes: Vec<String>,

        /// Also download main, sample and description images
        #[arg(long)]
        media: bool,

        /// Skip the AJAX endpoint
        #[arg(long)]
        static_only: bool,
    },

    /// Load snapshot files into the store
    Ingest {
        /// Snapshot directory (default: paths.raw_data_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Write the catalog as a static JSON file
    Export {
        /// Output file (default: <paths.public_data_dir>/works.json)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Serve the read API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "asmr_catalog=info,warn",
        1 => "asmr_catalog=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Migrate => {
            open_store(&config)?.run_migrations()?;
            println!("Migrations applied.");
        }

        Command::Dedupe => {
            let removed = CodeQueue::from_paths(&config.paths).dedupe_new_vs_seen()?;
            println!("Removed {} already-seen code(s) from the new list.", removed);
        }

        Command::ScrapeNew => {
            let _t = utils::Timer::start("Scrape new codes");
            let stats = Pipeline::new(config)?.scrape_new().await?;
            log_stats(&stats);
        }

        Command::Update => {
            let _t = utils::Timer::start("Refresh seen codes");
            let stats = Pipeline::new(config)?.refresh_seen().await?;
            log_stats(&stats);
        }

        Command::Run => {
            let _t = utils::Timer::start("Full run");
            let stats = Pipeline::new(config)?.run().await?;
            log_stats(&stats);
        }

        Command::Scrape { codes, media, static_only } => {
            let _t = utils::Timer::start("Scrape codes");
            let (codes, rejected): (Vec<String>, Vec<String>) = codes
                .into_iter()
                .map(|c| c.trim().to_string())
                .partition(|c| queue::is_work_code(c));
            for c in &rejected {
                warn!("Ignoring {:?}: not a work code", c);
            }

            let opts = ScrapeOptions {
                download_media: media,
                static_only,
            };
            let outcome = Pipeline::new(config)?.scrape_codes(&codes, opts).await?;
            info!(
                "Done: {} saved, {} failed",
                outcome.processed.len(),
                outcome.failed.len()
            );
            for c in &outcome.failed {
                println!("failed: {}", c);
            }
        }

        Command::Ingest { dir } => {
            let _t = utils::Timer::start("Snapshot ingest");
            let repo = open_store(&config)?;
            repo.run_migrations()?;
            let dir = dir.unwrap_or_else(|| config.paths.raw_data_dir.clone());
            let stats = ingest::ingest_dir(&repo, &dir)?;
            println!(
                "{} files: {} works, {} stats, {} skipped",
                stats.files, stats.works, stats.stats, stats.skipped
            );
        }

        Command::Export { out } => {
            let repo = open_store(&config)?;
            repo.run_migrations()?;
            let dest = out.unwrap_or_else(|| config.public_works_path());
            let n = catalog::export_catalog(&repo, &config.affiliate, &dest)?;
            println!("Exported {} works to {:?}", n, dest);
        }

        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            server::serve(&config, &host, port).await?;
        }

        Command::Stats => {
            let repo = open_store(&config)?;
            repo.run_migrations()?;
            let works = repo.work_count()?;
            let stats = repo.stats_count()?;
            let queue = CodeQueue::from_paths(&config.paths);

            println!("─────────────────────────────────");
            println!("  asmr-catalog: Database Stats");
            println!("─────────────────────────────────");
            println!("  Store     : {:?}", config.storage.db_path);
            println!("  Works     : {}", utils::fmt_number(works));
            println!("  Stats     : {}", utils::fmt_number(stats));
            println!("  New codes : {}", utils::fmt_number(queue.pending()?.len() as i64));
            println!("  Seen codes: {}", utils::fmt_number(queue.seen()?.len() as i64));
            for table in ["works", "stats"] {
                let cols = repo.table_columns(table)?;
                let rendered: Vec<String> =
                    cols.iter().map(|(name, ty)| format!("{} {}", name, ty)).collect();
                println!("  [{}] {}", table, rendered.join(", "));
            }
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}

/// Open the writable store, creating `paths.cache_dir` first.
fn open_store(config: &AppConfig) -> Result<Repository> {
    std::fs::create_dir_all(&config.paths.cache_dir)
        .with_context(|| format!("Could not create cache dir {:?}", config.paths.cache_dir))?;
    Repository::open(&config.storage.db_path)
}

fn log_stats(stats: &PipelineStats) {
    info!(
        "{} attempted | {} snapshots | {} failures",
        stats.codes_attempted, stats.snapshots_written, stats.failures
    );
    if let Some(ingest) = &stats.ingest {
        info!(
            "Ingested {} works, {} stats ({} skipped)",
            ingest.works, ingest.stats, ingest.skipped
        );
    }
}
