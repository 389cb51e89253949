//! The public shape of a work: stored row, list columns decoded, voice-actor
//! tag and purchase link added. Shared by the read API and the static export.

use crate::config::AffiliateConfig;
use crate::models::{ContentToken, RateCount};
use crate::scraper::cleaner::clean_cv;
use crate::storage::{Repository, WorkRow};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogEntry {
    #[serde(alias = "rj_code")]
    pub code: String,
    pub site_id: Option<String>,
    pub title: Option<String>,
    pub circle: Option<String>,
    pub release_date: Option<String>,
    pub description: Option<String>,
    pub img_url: Option<String>,
    pub media: Vec<String>,
    pub desc_images: Vec<String>,
    pub embeds: Vec<String>,
    pub chobit_url: Option<String>,
    pub genres: Vec<String>,
    pub cv: Vec<String>,
    pub content_tokens: Vec<ContentToken>,
    pub file_size: Option<String>,
    pub dl_count: Option<i64>,
    pub price: Option<i64>,
    pub rate_average: Option<f64>,
    pub wishlist_count: Option<i64>,
    pub rate_count_detail: Vec<RateCount>,
    pub affiliate_url: Option<String>,
}

/// Decode a JSON list column; anything unreadable becomes an empty list.
fn decode_list<T: DeserializeOwned>(raw: Option<&str>) -> Vec<T> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return vec![];
    };
    serde_json::from_str(raw).unwrap_or_else(|e| {
        debug!("Undecodable list column {:?}: {}", raw, e);
        vec![]
    })
}

pub fn affiliate_link(affiliate: &AffiliateConfig, site_id: &str, code: &str) -> String {
    format!(
        "{}/{}/dlaf/=/t/i/link/work/aid/{}/id/{}.html",
        affiliate.link_base.trim_end_matches('/'),
        site_id,
        affiliate.affiliate_id,
        code
    )
}

pub fn present(row: WorkRow, affiliate: &AffiliateConfig) -> CatalogEntry {
    let cv = clean_cv(&decode_list::<String>(row.cv.as_deref()));
    let mut genres: Vec<String> = decode_list(row.genres.as_deref());
    if !cv.is_empty() {
        genres.insert(0, format!("{}cv", cv.len()));
    }

    let site_id = row.site_id.clone().unwrap_or_else(|| "maniax".to_string());
    let affiliate_url = (!row.code.is_empty()).then(|| affiliate_link(affiliate, &site_id, &row.code));

    CatalogEntry {
        media: decode_list(row.media.as_deref()),
        desc_images: decode_list(row.desc_images.as_deref()),
        embeds: decode_list(row.embeds.as_deref()),
        content_tokens: decode_list(row.content_tokens.as_deref()),
        rate_count_detail: decode_list(row.rate_count_detail.as_deref()),
        genres,
        cv,
        affiliate_url,
        site_id: Some(site_id),
        code: row.code,
        title: row.title,
        circle: row.circle,
        release_date: row.release_date,
        description: row.description,
        img_url: row.img_url,
        chobit_url: row.chobit_url,
        file_size: row.file_size,
        dl_count: row.dl_count,
        price: row.price,
        rate_average: row.rate_average,
        wishlist_count: row.wishlist_count,
    }
}

pub fn build_catalog(repo: &Repository, affiliate: &AffiliateConfig) -> Result<Vec<CatalogEntry>> {
    let rows = repo.load_work_rows()?;
    Ok(rows.into_iter().map(|r| present(r, affiliate)).collect())
}

/// Previously exported catalog. A missing or malformed file reads as empty;
/// records that don't fit `CatalogEntry` are skipped one by one.
pub fn load_static_catalog(path: &Path) -> Vec<CatalogEntry> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return vec![];
    };
    let records: Vec<Value> = match serde_json::from_str(&text) {
        Ok(records) => records,
        Err(e) => {
            warn!("Static catalog {:?} is unreadable: {}", path, e);
            return vec![];
        }
    };

    let total = records.len();
    let entries: Vec<CatalogEntry> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping static catalog record: {}", e);
                None
            }
        })
        .collect();
    if entries.len() < total {
        warn!(
            "Static catalog {:?}: skipped {} of {} records",
            path,
            total - entries.len(),
            total
        );
    }
    entries
}

/// Live catalog from the store, or the static export when the store can't
/// be opened, fails, or is empty.
pub fn load_catalog(db_path: &Path, fallback: &Path, affiliate: &AffiliateConfig) -> Vec<CatalogEntry> {
    let live = Repository::open_read_only(db_path).and_then(|repo| build_catalog(&repo, affiliate));
    match live {
        Ok(entries) if !entries.is_empty() => entries,
        Ok(_) => {
            debug!("Store is empty, serving {:?}", fallback);
            load_static_catalog(fallback)
        }
        Err(e) => {
            warn!("Store unavailable ({:#}), serving {:?}", e, fallback);
            load_static_catalog(fallback)
        }
    }
}

/// Dump the catalog to `dest` for deployments without a live store.
pub fn export_catalog(repo: &Repository, affiliate: &AffiliateConfig, dest: &Path) -> Result<usize> {
    let entries = build_catalog(repo, affiliate)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let body = serde_json::to_string_pretty(&entries)?;
    let tmp = dest.with_extension("json.tmp");
    std::fs::write(&tmp, body).with_context(|| format!("write {:?}", tmp))?;
    std::fs::rename(&tmp, dest).with_context(|| format!("rename into {:?}", dest))?;
    info!("Exported {} works to {:?}", entries.len(), dest);
    Ok(entries.len())
}
