pub mod cleaner;
pub mod http_client;
pub mod parsers;
pub mod urls;

use crate::config::{AppConfig, ScraperConfig};
use crate::models::{DynamicInfo, StaticInfo};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use self::cleaner::clean_dynamic;
use self::http_client::{random_delay, FetchError, HttpClient};
use self::parsers::{parse_embed_page, parse_work_page};
use self::urls::{find_embed_url, rewrite_affiliate};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable catalog source. Each side answers independently; `None` means
/// "nothing usable from this source" and is never fatal on its own.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_static(&self, code: &str) -> Option<StaticInfo>;
    async fn fetch_dynamic(&self, code: &str) -> Option<DynamicInfo>;
}

// ── DLsite scraper ────────────────────────────────────────────────────────────

pub struct DlsiteScraper {
    client: HttpClient,
    config: ScraperConfig,
    base_url: String,
    embed_base_url: String,
    affiliate_id: String,
}

impl DlsiteScraper {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let sc = &config.scraper;
        Ok(Self {
            client: HttpClient::new(
                &sc.user_agent,
                Duration::from_secs(sc.timeout_secs),
                sc.max_retries,
            )?,
            config: sc.clone(),
            base_url: sc.base_url.trim_end_matches('/').to_string(),
            embed_base_url: sc.embed_base_url.trim_end_matches('/').to_string(),
            affiliate_id: config.affiliate.affiliate_id.clone(),
        })
    }

    /// Item page. e.g. RJ01000001 → /maniax/work/=/product_id/RJ01000001.html
    fn work_url(&self, code: &str) -> String {
        format!("{}/work/=/product_id/{}.html", self.base_url, code)
    }

    fn ajax_url(&self, code: &str) -> Option<Url> {
        Url::parse_with_params(
            &format!("{}/product/info/ajax", self.base_url),
            &[("product_id", code), ("cdn_cache_min", "1")],
        )
        .ok()
    }

    fn affiliate_tool_url(&self, code: &str) -> String {
        format!("{}/dlaf/tool/=/work_id/{}", self.base_url, code)
    }

    fn embed_search_url(&self, code: &str) -> Option<Url> {
        Url::parse_with_params(
            &format!("{}/s/", self.embed_base_url),
            &[("f_category", "all"), ("q_keyword", code)],
        )
        .ok()
    }

    fn page_headers(&self) -> Vec<(&'static str, String)> {
        vec![("Cookie", self.config.age_gate_cookie.clone())]
    }

    async fn try_fetch_static(&self, code: &str) -> Result<StaticInfo, FetchError> {
        let url = self.work_url(code);
        let html = self.client.get_text(&url, &self.page_headers()).await?;
        Ok(parse_work_page(&html, &self.affiliate_id))
    }

    async fn try_fetch_dynamic(&self, code: &str) -> Result<DynamicInfo, FetchError> {
        let Some(url) = self.ajax_url(code) else {
            return Err(FetchError::MissingEntry(code.to_string()));
        };
        let headers = [
            ("Referer", self.work_url(code)),
            ("X-Requested-With", "XMLHttpRequest".to_string()),
        ];

        random_delay(self.config.dynamic_delay_min_ms, self.config.dynamic_delay_max_ms).await;

        let body = self.client.get_json(url.as_str(), &headers).await?;
        let info = body.get(code).map(clean_dynamic).unwrap_or_default();
        if info.is_empty() {
            return Err(FetchError::MissingEntry(code.to_string()));
        }
        Ok(info)
    }

    /// Embed tiers that need extra requests: the affiliate tool page, then
    /// the provider's keyword search. Each is toggled by config.
    async fn resolve_fallback_embed(&self, code: &str) -> Option<String> {
        if self.config.enable_affiliate_tool_fallback {
            if let Some(url) = self.embed_from_affiliate_tool(code).await {
                return Some(url);
            }
        }
        if self.config.enable_embed_search {
            if let Some(url) = self.embed_via_search(code).await {
                return Some(url);
            }
        }
        None
    }

    async fn embed_from_affiliate_tool(&self, code: &str) -> Option<String> {
        let url = self.affiliate_tool_url(code);
        match self.client.get_text(&url, &self.page_headers()).await {
            Ok(text) => find_embed_url(&text),
            Err(e) => {
                warn!("[{}] Affiliate tool fetch failed: {}", code, e);
                None
            }
        }
    }

    async fn embed_via_search(&self, code: &str) -> Option<String> {
        let search_url = self.embed_search_url(code)?;

        let page = match self.client.get_text(search_url.as_str(), &[]).await {
            Ok(html) => parse_embed_page(&html),
            Err(e) => {
                warn!("[{}] Embed search failed: {}", code, e);
                return None;
            }
        };
        if page.embed.is_some() {
            return page.embed;
        }

        let link = page.work_links.first()?;
        let work_url = Url::parse(&self.embed_base_url).ok()?.join(link).ok()?;
        debug!("[{}] Following embed search hit {}", code, work_url);

        match self.client.get_text(work_url.as_str(), &[]).await {
            Ok(html) => parse_embed_page(&html).embed,
            Err(e) => {
                warn!("[{}] Embed work page fetch failed: {}", code, e);
                None
            }
        }
    }
}

#[async_trait]
impl CatalogSource for DlsiteScraper {
    async fn fetch_static(&self, code: &str) -> Option<StaticInfo> {
        let mut info = match self.try_fetch_static(code).await {
            Ok(info) => info,
            Err(e) => {
                warn!("[{}] Static data fetch error: {}", code, e);
                return None;
            }
        };

        if info.chobit_url.is_none() {
            let fallback = self.resolve_fallback_embed(code).await;
            info.chobit_url = rewrite_affiliate(fallback.as_deref(), &self.affiliate_id);
        }

        info!(
            "[{}] static: title={:?} samples={} desc_images={} embed={}",
            code,
            info.title,
            info.media.len(),
            info.desc_images.len(),
            info.chobit_url.is_some()
        );
        Some(info)
    }

    async fn fetch_dynamic(&self, code: &str) -> Option<DynamicInfo> {
        match self.try_fetch_dynamic(code).await {
            Ok(info) => {
                debug!("[{}] dynamic: dl_count={:?} price={:?}", code, info.dl_count, info.price);
                Some(info)
            }
            Err(e) => {
                warn!("[{}] Dynamic data fetch error: {}", code, e);
                None
            }
        }
    }
}
