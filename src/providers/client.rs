use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use reqwest::Url;
use serde_json::Value;
use tokio::time::sleep;

use crate::{config::ProviderConfig, error::FetchError, util};

use super::adapter::Page;

/// Guard against providers whose "next" pointer never terminates.
pub const MAX_PAGES: usize = 100;

/// Retry settings for one provider.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per call, first try included
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for every further retry
    pub backoff_base: Duration,

    /// Extra random delay, as a fraction of the backoff delay
    pub jitter: f64,
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(cfg: &ProviderConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            jitter: cfg.backoff_jitter,
        }
    }
}

/// Shared HTTP plumbing for every network-backed provider.
///
/// Responsibilities:
/// - GET + JSON decode with retry, exponential backoff and jitter
/// - Following "next" pointers across pages
/// - Counting every outbound attempt
///
/// NOT RESPONSIBLE FOR:
/// - Request shapes (adapter responsibility)
/// - Field normalization (see `adapter::normalize_series`)
///
pub struct HistoryClient {
    provider: &'static str,
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    calls: AtomicU64,
}

impl HistoryClient {
    /// Builds a client for `provider`.
    ///
    /// `default_base_url` is used unless the provider configuration
    /// overrides it.
    pub fn new(
        provider: &'static str,
        default_base_url: &str,
        cfg: &ProviderConfig,
    ) -> Result<Self, FetchError> {
        let raw = cfg.base_url.as_deref().unwrap_or(default_base_url);
        let base_url = Url::parse(raw).map_err(|e| FetchError::InvalidRequest {
            provider: provider.to_string(),
            message: format!("bad base url '{}': {}", raw, e),
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::InvalidRequest {
                provider: provider.to_string(),
                message: format!("cannot build http client: {}", e),
            })?;

        Ok(Self {
            provider,
            http,
            base_url,
            retry: RetryPolicy::from(cfg),
            calls: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` below the base URL.
    ///
    /// The base is treated as a directory even without a trailing
    /// slash ("https://x/latest" + "markets/1" -> "https://x/latest/markets/1").
    pub fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }

        base.join(path).map_err(|e| FetchError::InvalidRequest {
            provider: self.provider.to_string(),
            message: format!("bad endpoint '{}': {}", path, e),
        })
    }

    /// Outbound attempts so far, including retries and extra pages.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Fetches every page starting at `first` and returns all raw
    /// entries in page order.
    ///
    /// A page that fails after all retries fails the whole call;
    /// entries from earlier pages are discarded.
    pub async fn get_paginated(&self, first: Url) -> Result<Vec<Value>, FetchError> {
        let mut entries = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= MAX_PAGES {
                warn!(
                    "pagination limit reached provider={} pages={} url={}",
                    self.provider, pages, url
                );
                break;
            }

            let page = Page::from_value(self.get_json(&url).await?);
            pages += 1;
            entries.extend(page.items);

            if let Some(raw) = page.next {
                next = Some(self.resolve_next(&url, &raw)?);
            }
        }

        debug!(
            "fetched provider={} pages={} entries={}",
            self.provider,
            pages,
            entries.len()
        );
        Ok(entries)
    }

    /// Resolves a "next" pointer against the URL of the page that
    /// returned it (RFC 3986 reference resolution). Absolute pointers
    /// are used as given.
    fn resolve_next(&self, current: &Url, raw: &str) -> Result<Url, FetchError> {
        current.join(raw).map_err(|e| FetchError::InvalidRequest {
            provider: self.provider.to_string(),
            message: format!("bad next pointer '{}': {}", raw, e),
        })
    }

    /// GET `url` as JSON, retrying transient failures.
    pub async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = util::backoff_delay(self.retry.backoff_base, attempt - 1, self.retry.jitter);
                sleep(delay).await;
            }

            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(
                        "fetch attempt failed provider={} attempt={}/{} url={} error={}",
                        self.provider,
                        attempt + 1,
                        self.retry.max_attempts,
                        url,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(FetchError::ExhaustedRetries {
            provider: self.provider.to_string(),
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, url: &Url) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transient(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transient(format!("HTTP {}", status)));
        }

        response.json::<Value>().await.map_err(|e| self.transient(e))
    }

    fn transient(&self, e: impl std::fmt::Display) -> FetchError {
        FetchError::Transient {
            provider: self.provider.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_base_url_overrides_default() {
        let mut cfg = ProviderConfig::named("esi");
        cfg.base_url = Some("http://127.0.0.1:9/api/".to_string());

        let client = HistoryClient::new("esi", "https://esi.evetech.net/latest/", &cfg).unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9/api/");
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn endpoint_treats_base_as_directory() {
        let mut cfg = ProviderConfig::named("esi");
        cfg.base_url = Some("https://esi.example/latest".to_string());

        let client = HistoryClient::new("esi", "https://unused/", &cfg).unwrap();
        let url = client.endpoint("markets/10000002/history/").unwrap();
        assert_eq!(url.as_str(), "https://esi.example/latest/markets/10000002/history/");
    }

    #[test]
    fn next_pointer_resolves_against_current_page() {
        let mut cfg = ProviderConfig::named("fuzzwork");
        cfg.base_url = Some("https://market.example/api/history".to_string());
        let client = HistoryClient::new("fuzzwork", "https://unused/", &cfg).unwrap();

        let current = Url::parse("https://market.example/api/v2/history?typeid=34&page=1").unwrap();
        let resolve = |raw: &str| client.resolve_next(&current, raw).unwrap().to_string();

        assert_eq!(resolve("?typeid=34&page=2"), "https://market.example/api/v2/history?typeid=34&page=2");
        assert_eq!(resolve("page/3"), "https://market.example/api/v2/page/3");
        assert_eq!(resolve("/api/history?page=4"), "https://market.example/api/history?page=4");
        assert_eq!(resolve("https://cdn.example/h?page=5"), "https://cdn.example/h?page=5");
    }

    #[test]
    fn bad_base_url_is_invalid_request() {
        let mut cfg = ProviderConfig::named("esi");
        cfg.base_url = Some("not a url".to_string());

        let err = HistoryClient::new("esi", "https://x/", &cfg).err().unwrap();
        assert!(matches!(err, FetchError::InvalidRequest { .. }));
    }

    #[test]
    fn retry_policy_never_drops_below_one_attempt() {
        let mut cfg = ProviderConfig::named("x");
        cfg.max_attempts = 0;
        assert_eq!(RetryPolicy::from(&cfg).max_attempts, 1);
    }
}
