use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, NaiveTime};
use serde_json::json;

use crate::{error::FetchError, schema::MarketSnapshot, util};

use super::adapter::MarketAdapter;

/// Offline provider used for demo mode and tests.
///
/// Produces one point per day of the window, stamped at UTC midnight,
/// so repeated fetches on the same day yield identical identity keys.
/// No network I/O is performed, but calls are still counted.
pub struct StubAdapter {
    region_id: i64,
    calls: AtomicU64,
}

impl StubAdapter {
    pub fn new(region_id: i64) -> Self {
        Self {
            region_id,
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl MarketAdapter for StubAdapter {
    fn provider(&self) -> &'static str {
        "stub"
    }

    fn region_id(&self) -> i64 {
        self.region_id
    }

    async fn fetch(&self, item_id: i64, window_days: u32) -> Result<Vec<MarketSnapshot>, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let today = util::now_utc()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();

        // Oldest first
        Ok((0..window_days)
            .rev()
            .map(|offset| {
                let days = i64::from(offset);
                let offset = f64::from(offset);
                MarketSnapshot {
                    provider: self.provider().to_string(),
                    item_id,
                    region_id: self.region_id,
                    timestamp: today - Duration::days(days),
                    price: Some(50.0 + offset),
                    volume: Some(1_000.0 + offset * 10.0),
                    spread: Some(2.5),
                    payload: json!({ "stub": true, "day": days }),
                    from_sde: false,
                }
            })
            .collect())
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_one_ordered_point_per_day() {
        let stub = StubAdapter::new(10000002);
        let points = stub.fetch(34, 7).await.unwrap();

        assert_eq!(points.len(), 7);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(points.last().unwrap().price, Some(50.0));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_fetches_share_identity_keys() {
        let stub = StubAdapter::new(1);
        let a = stub.fetch(34, 3).await.unwrap();
        let b = stub.fetch(34, 3).await.unwrap();

        let keys_a: Vec<_> = a.iter().map(|p| (p.timestamp, p.item_id, p.region_id)).collect();
        let keys_b: Vec<_> = b.iter().map(|p| (p.timestamp, p.item_id, p.region_id)).collect();
        assert_eq!(keys_a, keys_b);
        assert_eq!(stub.calls(), 2);
    }
}
