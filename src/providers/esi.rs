use reqwest::Url;

use crate::{config::ProviderConfig, error::FetchError, schema::MarketSnapshot, util};

use super::adapter::{MarketAdapter, Window, normalize_series};
use super::client::HistoryClient;

const DEFAULT_URL: &str = "https://esi.evetech.net/latest/";

/// EVE Swagger Interface (ESI) market history adapter
///
/// GET {base}/markets/{region_id}/history/?datasource=tranquility&type_id={id}
///
/// Response: bare array of
///   { "date", "average", "highest", "lowest", "order_count", "volume" }
///
/// NOTES:
/// - ESI has no window parameters and always returns about a year of
///   history, so the window is applied client-side.
/// - Spread is derived from `highest - lowest`.
pub struct EsiAdapter {
    client: HistoryClient,
    region_id: i64,
}

impl EsiAdapter {
    pub fn new(cfg: &ProviderConfig, region_id: i64) -> Result<Self, FetchError> {
        Ok(Self {
            client: HistoryClient::new("esi", DEFAULT_URL, cfg)?,
            region_id,
        })
    }

    fn request_url(&self, item_id: i64) -> Result<Url, FetchError> {
        let mut url = self
            .client
            .endpoint(&format!("markets/{}/history/", self.region_id))?;
        url.query_pairs_mut()
            .append_pair("datasource", "tranquility")
            .append_pair("type_id", &item_id.to_string());
        Ok(url)
    }
}

#[async_trait::async_trait]
impl MarketAdapter for EsiAdapter {
    fn provider(&self) -> &'static str {
        "esi"
    }

    fn region_id(&self) -> i64 {
        self.region_id
    }

    async fn fetch(&self, item_id: i64, window_days: u32) -> Result<Vec<MarketSnapshot>, FetchError> {
        let window = Window::ending_at(util::now_utc(), window_days);
        let entries = self.client.get_paginated(self.request_url(item_id)?).await?;

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
    fn request_targets_region_history() {
        let adapter = EsiAdapter::new(&ProviderConfig::named("esi"), 10000043).unwrap();
        let url = adapter.request_url(34).unwrap();

        assert_eq!(
            url.as_str(),
            "https://esi.evetech.net/latest/markets/10000043/history/?datasource=tranquility&type_id=34"
        );
    }
}
