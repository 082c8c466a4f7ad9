use reqwest::Url;

use crate::{config::ProviderConfig, error::FetchError, schema::MarketSnapshot, util};

use super::adapter::{MarketAdapter, Window, normalize_series};
use super::client::HistoryClient;

const DEFAULT_URL: &str = "https://api.adam4eve.eu/market_history";

/// Adam4EVE market history adapter
///
/// Answers with a bare JSON array, one entry per day:
///   [{ "date": "2025-09-23", "avgPrice": 50.0, "avgVolume": 1000 }, …]
///
/// No pagination. The configured base URL is the full endpoint.
pub struct Adam4EveAdapter {
    client: HistoryClient,
    region_id: i64,
}

impl Adam4EveAdapter {
    pub fn new(cfg: &ProviderConfig, region_id: i64) -> Result<Self, FetchError> {
        Ok(Self {
            client: HistoryClient::new("adam4eve", DEFAULT_URL, cfg)?,
            region_id,
        })
    }

    fn request_url(&self, item_id: i64, window: &Window) -> Url {
        let mut url = self.client.base_url().clone();
        url.query_pairs_mut()
            .append_pair("type_id", &item_id.to_string())
            .append_pair("region_id", &self.region_id.to_string())
            .append_pair("start", &window.start_date())
            .append_pair("end", &window.end_date());
        url
    }
}

#[async_trait::async_trait]
impl MarketAdapter for Adam4EveAdapter {
    fn provider(&self) -> &'static str {
        "adam4eve"
    }

    fn region_id(&self) -> i64 {
        self.region_id
    }

    async fn fetch(&self, item_id: i64, window_days: u32) -> Result<Vec<MarketSnapshot>, FetchError> {
        let window = Window::ending_at(util::now_utc(), window_days);
        let entries = self
            .client
            .get_paginated(self.request_url(item_id, &window))
            .await?;

        Ok(normalize_series(self.provider(), item_id, self.region_id, &window, &entries))
    }

    fn calls(&self) -> u64 {
        self.client.calls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn request_carries_window_dates() {
        let adapter = Adam4EveAdapter::new(&ProviderConfig::named("adam4eve"), 10000002).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 9, 24, 8, 0, 0).unwrap();
        let url = adapter.request_url(603, &Window::ending_at(end, 1));

        assert_eq!(
            url.as_str(),
            "https://api.adam4eve.eu/market_history?type_id=603&region_id=10000002&start=2025-09-23&end=2025-09-24"
        );
    }
}
