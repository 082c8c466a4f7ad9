use reqwest::Url;

use crate::{config::ProviderConfig, error::FetchError, schema::MarketSnapshot, util};

use super::adapter::{MarketAdapter, Window, normalize_series};
use super::client::HistoryClient;

const DEFAULT_URL: &str = "https://market.fuzzwork.co.uk/api/history";

/// Fuzzwork market history adapter
///
/// Paginated:
///   { "results": [{ "timestamp", "price_avg", "volume" }, …],
///     "next": "<absolute or relative url>" | null }
///
/// Pages are followed until `next` is exhausted; every page request
/// counts as one outbound call.
pub struct FuzzworkAdapter {
    client: HistoryClient,
    region_id: i64,
}

impl FuzzworkAdapter {
    pub fn new(cfg: &ProviderConfig, region_id: i64) -> Result<Self, FetchError> {
        Ok(Self {
            client: HistoryClient::new("fuzzwork", DEFAULT_URL, cfg)?,
            region_id,
        })
    }

    fn request_url(&self, item_id: i64, window_days: u32) -> Url {
        let mut url = self.client.base_url().clone();
        url.query_pairs_mut()
            .append_pair("typeid", &item_id.to_string())
            .append_pair("regionid", &self.region_id.to_string())
            .append_pair("days", &window_days.to_string());
        url
    }
}

#[async_trait::async_trait]
impl MarketAdapter for FuzzworkAdapter {
    fn provider(&self) -> &'static str {
        "fuzzwork"
    }

    fn region_id(&self) -> i64 {
        self.region_id
    }

    async fn fetch(&self, item_id: i64, window_days: u32) -> Result<Vec<MarketSnapshot>, FetchError> {
        let window = Window::ending_at(util::now_utc(), window_days);
        let entries = self
            .client
            .get_paginated(self.request_url(item_id, window_days))
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

    #[test]
    fn request_uses_fuzzwork_parameter_names() {
        let adapter = FuzzworkAdapter::new(&ProviderConfig::named("fuzzwork"), 10000002).unwrap();
        let url = adapter.request_url(34, 7);

        assert_eq!(url.query(), Some("typeid=34&regionid=10000002&days=7"));
    }
}
