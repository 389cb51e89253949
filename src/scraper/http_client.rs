use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Why a single GET produced nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: StatusCode },

    #[error("undecodable body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response has no entry for {0}")]
    MissingEntry(String),
}

impl FetchError {
    /// Timeouts, connection trouble, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { source, .. } => !source.is_builder(),
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            FetchError::Decode { .. } | FetchError::MissingEntry(_) => false,
        }
    }
}

/// Extra request headers, e.g. the age-gate cookie or an AJAX referer.
pub type Headers<'a> = &'a [(&'static str, String)];

pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner, max_retries })
    }

    pub async fn get_text(&self, url: &str, headers: Headers<'_>) -> Result<String, FetchError> {
        let resp = self.send_with_retry(url, headers).await?;
        resp.text().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get_json(&self, url: &str, headers: Headers<'_>) -> Result<Value, FetchError> {
        let resp = self.send_with_retry(url, headers).await?;
        resp.json::<Value>().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.send_with_retry(url, &[]).await?;
        let body = resp.bytes().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?;
        Ok(body.to_vec())
    }

    async fn send_with_retry(
        &self,
        url: &str,
        headers: Headers<'_>,
    ) -> Result<reqwest::Response, FetchError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(8))
            .map(jitter)
            .take(self.max_retries as usize);

        RetryIf::start(
            strategy,
            || self.send_once(url, headers),
            |e: &FetchError| {
                let retry = e.is_transient();
                if retry {
                    warn!("{}, retrying", e);
                }
                retry
            },
        )
        .await
    }

    async fn send_once(
        &self,
        url: &str,
        headers: Headers<'_>,
    ) -> Result<reqwest::Response, FetchError> {
        debug!("GET {}", url);

        let mut req = self.inner.get(url);
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }

        let resp = req.send().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(resp)
    }
}

/// Sleep for a uniformly random duration in `[min_ms, max_ms]`.
pub async fn random_delay(min_ms: u64, max_ms: u64) {
    let ms = if max_ms <= min_ms {
        min_ms
    } else {
        rand::rng().random_range(min_ms..=max_ms)
    };
    if ms > 0 {
        debug!("Sleeping {} ms", ms);
        sleep(Duration::from_millis(ms)).await;
    }
}
