//! Image cache: `<image_root>/<code>/{main,sample_NN,desc_NN}.<ext>`.
//!
//! A destination that already exists is never fetched again, and a failed
//! transfer never leaves a file behind, so re-running fills in only the gaps.

use crate::config::AppConfig;
use crate::scraper::http_client::HttpClient;
use crate::scraper::urls::{dedupe, normalize};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// The normalized, deduplicated set of URLs worth downloading for one work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlan {
    pub main: Option<String>,
    pub samples: Vec<String>,
    pub descs: Vec<String>,
}

impl MediaPlan {
    /// Samples lose duplicates and the main image; description images lose
    /// duplicates and anything already counted as a sample.
    pub fn resolve(main: Option<&str>, samples: &[String], descs: &[String]) -> Self {
        let main = normalize(main);

        let samples: Vec<String> = dedupe(samples)
            .into_iter()
            .filter(|u| Some(u) != main.as_ref())
            .collect();

        let sample_set: HashSet<&str> = samples.iter().map(String::as_str).collect();
        let descs: Vec<String> = dedupe(descs)
            .into_iter()
            .filter(|u| !sample_set.contains(u.as_str()))
            .collect();

        Self {
            main,
            samples,
            descs,
        }
    }

    /// `(url, file name)` pairs in download order.
    pub fn targets(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(main) = &self.main {
            out.push((main.clone(), format!("main{}", extension_for(main))));
        }
        for (i, url) in self.samples.iter().enumerate() {
            out.push((url.clone(), format!("sample_{:02}{}", i + 1, extension_for(url))));
        }
        for (i, url) in self.descs.iter().enumerate() {
            out.push((url.clone(), format!("desc_{:02}{}", i + 1, extension_for(url))));
        }
        out
    }
}

/// `.png` for `https://h/a/b.png?x=1`, `.jpg` when the path has no suffix.
pub fn extension_for(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            let path = u.path().to_string();
            Path::new(&path)
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty())
                .map(|e| format!(".{}", e))
        })
        .unwrap_or_else(|| ".jpg".to_string())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct MediaDownloader {
    client: HttpClient,
    image_root: PathBuf,
}

impl MediaDownloader {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(
                &config.scraper.user_agent,
                Duration::from_secs(config.scraper.image_timeout_secs),
                0,
            )?,
            image_root: config.paths.image_root.clone(),
        })
    }

    pub fn work_dir(&self, code: &str) -> PathBuf {
        self.image_root.join(code)
    }

    pub async fn download(
        &self,
        code: &str,
        main: Option<&str>,
        samples: &[String],
        descs: &[String],
    ) -> DownloadReport {
        let plan = MediaPlan::resolve(main, samples, descs);
        let dir = self.work_dir(code);
        let mut report = DownloadReport::default();

        for (url, name) in plan.targets() {
            let dest = dir.join(&name);
            if dest.exists() {
                debug!("[{}] cached {}", code, name);
                report.skipped += 1;
                continue;
            }
            match self.fetch_to(&url, &dest).await {
                Ok(()) => report.downloaded += 1,
                Err(e) => {
                    warn!("[{}] Download failed {}: {:#}", code, url, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "[{}] images: {} downloaded, {} cached, {} failed",
            code, report.downloaded, report.skipped, report.failed
        );
        report
    }

    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<()> {
        let bytes = self.client.get_bytes(url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let tmp = dest.with_extension("part");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("write {:?}", tmp))?;
        tokio::fs::rename(&tmp, dest)
            .await
            .with_context(|| format!("rename {:?} → {:?}", tmp, dest))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_plan_dedupes_samples_and_descs() {
        let plan = MediaPlan::resolve(
            None,
            &s(&["https://h/A.jpg", "https://h/B.jpg", "https://h/A.jpg"]),
            &s(&["https://h/B.jpg", "https://h/C.jpg"]),
        );
        assert_eq!(plan.samples, s(&["https://h/A.jpg", "https://h/B.jpg"]));
        assert_eq!(plan.descs, s(&["https://h/C.jpg"]));
    }

    #[test]
    fn test_plan_drops_main_from_samples() {
        let plan = MediaPlan::resolve(
            Some("//h/main.jpg"),
            &s(&["https://h/main.jpg", "//h/s1.png"]),
            &[],
        );
        assert_eq!(plan.main.as_deref(), Some("https://h/main.jpg"));
        assert_eq!(plan.samples, s(&["https://h/s1.png"]));
    }

    #[test]
    fn test_target_names() {
        let plan = MediaPlan::resolve(
            Some("https://h/main.webp"),
            &s(&["https://h/s1.png", "https://h/noext"]),
            &s(&["https://h/d1.gif?w=1"]),
        );
        let names: Vec<String> = plan.targets().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, s(&["main.webp", "sample_01.png", "sample_02.jpg", "desc_01.gif"]));
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("https://h/a/b.png?x=1"), ".png");
        assert_eq!(extension_for("https://h/a/b"), ".jpg");
        assert_eq!(extension_for("not a url"), ".jpg");
    }

    #[tokio::test]
    async fn test_cached_files_are_skipped_and_failures_tolerated() {
        let dir = tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.paths.image_root = dir.path().to_path_buf();
        cfg.scraper.image_timeout_secs = 2;
        let dl = MediaDownloader::new(&cfg).unwrap();

        let work_dir = dl.work_dir("RJ1");
        std::fs::create_dir_all(&work_dir).unwrap();
        std::fs::write(work_dir.join("main.jpg"), b"cached").unwrap();

        let report = dl
            .download(
                "RJ1",
                Some("http://127.0.0.1:9/main.jpg"),
                &s(&["http://127.0.0.1:9/s1.jpg"]),
                &[],
            )
            .await;

        assert_eq!(report, DownloadReport { downloaded: 0, skipped: 1, failed: 1 });
        assert!(!work_dir.join("sample_01.jpg").exists());
        assert_eq!(std::fs::read(work_dir.join("main.jpg")).unwrap(), b"cached");
    }
}
