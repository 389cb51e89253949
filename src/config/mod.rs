use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub affiliate: AffiliateConfig,
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Catalog floor root, e.g. `https://www.dlsite.com/maniax`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_embed_base_url")]
    pub embed_base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_age_gate_cookie")]
    pub age_gate_cookie: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_dynamic_delay_min_ms")]
    pub dynamic_delay_min_ms: u64,

    #[serde(default = "default_dynamic_delay_max_ms")]
    pub dynamic_delay_max_ms: u64,

    #[serde(default = "default_code_delay_min_ms")]
    pub code_delay_min_ms: u64,

    #[serde(default = "default_code_delay_max_ms")]
    pub code_delay_max_ms: u64,

    /// Try the affiliate tool page when the item page exposes no embed
    #[serde(default = "default_true")]
    pub enable_affiliate_tool_fallback: bool,

    /// Try the embed provider's keyword search as a last resort
    #[serde(default = "default_true")]
    pub enable_embed_search: bool,
}

/// Affiliate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AffiliateConfig {
    #[serde(default = "default_affiliate_id")]
    pub affiliate_id: String,

    #[serde(default = "default_link_base")]
    pub link_base: String,
}

/// Filesystem layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Snapshot output (`<code>.json`)
    #[serde(default = "default_raw_data_dir")]
    pub raw_data_dir: PathBuf,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Static export target, also the read API fallback
    #[serde(default = "default_public_data_dir")]
    pub public_data_dir: PathBuf,

    #[serde(default = "default_image_root")]
    pub image_root: PathBuf,

    #[serde(default = "default_new_codes_file")]
    pub new_codes_file: PathBuf,

    #[serde(default = "default_seen_codes_file")]
    pub seen_codes_file: PathBuf,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Codes in flight at once. 1 keeps the run strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Read API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Upper bound on `pipeline.concurrency` regardless of configuration.
pub const MAX_CONCURRENCY: usize = 4;

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.dlsite.com/maniax".to_string()
}
fn default_embed_base_url() -> String {
    "https://chobit.cc".to_string()
}
fn default_user_agent() -> String {
    "ASMR-Finder-Bot/1.0".to_string()
}
fn default_age_gate_cookie() -> String {
    "adult_checked=1".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_image_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    2
}
fn default_dynamic_delay_min_ms() -> u64 {
    1000
}
fn default_dynamic_delay_max_ms() -> u64 {
    3000
}
fn default_code_delay_min_ms() -> u64 {
    2000
}
fn default_code_delay_max_ms() -> u64 {
    5000
}
fn default_affiliate_id() -> String {
    "gentleman_dl".to_string()
}
fn default_link_base() -> String {
    "https://dlaf.jp".to_string()
}
fn default_raw_data_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}
fn default_public_data_dir() -> PathBuf {
    PathBuf::from("data/public")
}
fn default_image_root() -> PathBuf {
    PathBuf::from("images")
}
fn default_new_codes_file() -> PathBuf {
    PathBuf::from("codes/New_Code.txt")
}
fn default_seen_codes_file() -> PathBuf {
    PathBuf::from("codes/Update_Code.txt")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/cache/asmr.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    1
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("ASMR").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        let app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(app_cfg)
    }

    /// Where the static export lands and where the read API falls back to.
    pub fn public_works_path(&self) -> PathBuf {
        self.paths.public_data_dir.join("works.json")
    }

    /// Effective concurrency, clamped to `1..=MAX_CONCURRENCY`.
    pub fn concurrency(&self) -> usize {
        self.pipeline.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embed_base_url: default_embed_base_url(),
            user_agent: default_user_agent(),
            age_gate_cookie: default_age_gate_cookie(),
            timeout_secs: default_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
            max_retries: default_max_retries(),
            dynamic_delay_min_ms: default_dynamic_delay_min_ms(),
            dynamic_delay_max_ms: default_dynamic_delay_max_ms(),
            code_delay_min_ms: default_code_delay_min_ms(),
            code_delay_max_ms: default_code_delay_max_ms(),
            enable_affiliate_tool_fallback: true,
            enable_embed_search: true,
        }
    }
}

impl Default for AffiliateConfig {
    fn default() -> Self {
        Self {
            affiliate_id: default_affiliate_id(),
            link_base: default_link_base(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_data_dir: default_raw_data_dir(),
            cache_dir: default_cache_dir(),
            public_data_dir: default_public_data_dir(),
            image_root: default_image_root(),
            new_codes_file: default_new_codes_file(),
            seen_codes_file: default_seen_codes_file(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_is_clamped() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.concurrency = 0;
        assert_eq!(cfg.concurrency(), 1);
        cfg.pipeline.concurrency = 64;
        assert_eq!(cfg.concurrency(), MAX_CONCURRENCY);
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"affiliate": {"affiliate_id": "abc"}}"#).unwrap();
        assert_eq!(cfg.affiliate.affiliate_id, "abc");
        assert_eq!(cfg.affiliate.link_base, "https://dlaf.jp");
        assert_eq!(cfg.scraper.user_agent, "ASMR-Finder-Bot/1.0");
        assert!(cfg.scraper.enable_embed_search);
    }
}
