use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::FetchError;
use crate::schema::MarketSnapshot;
use crate::util;

/// MarketAdapter is the abstraction layer between:
/// - The generic market scheduler
/// - Provider-specific HTTP APIs
///
/// Each provider implementation must:
/// - Build its request for a history window ending "now"
/// - Return normalized `MarketSnapshot`s in timestamp order
/// - Count every outbound call it makes (retries and pages included)
///
/// DESIGN GOALS:
/// - Zero provider-specific logic outside adapters
/// - One adapter per provider
/// - Uniform output format across all providers
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Adapter instances are shared across tasks
///
#[async_trait::async_trait]
pub trait MarketAdapter: Send + Sync {
    /// Canonical provider name.
    ///
    /// CONTRACT:
    /// - Matches `providers[].name` in configuration
    /// - Used as the rate limiter key and as `MarketSnapshot.provider`
    fn provider(&self) -> &'static str;

    /// Region this adapter fetches for.
    fn region_id(&self) -> i64;

    /// Fetches `window_days` of history for one item.
    ///
    /// ERRORS:
    /// - `FetchError::ExhaustedRetries` once every attempt failed
    /// - `FetchError::InvalidRequest` when no request could be built
    ///
    /// The scheduler treats any error as a failure of this item only.
    async fn fetch(&self, item_id: i64, window_days: u32)
        -> Result<Vec<MarketSnapshot>, FetchError>;

    /// Outbound calls attempted so far, for external accounting.
    fn calls(&self) -> u64;
}

// ------------------------------------------------------------
// History window
// ------------------------------------------------------------
//
// Providers publish daily buckets, so window membership is
// decided on calendar dates, not instants.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window ending at `end` and starting `days` earlier.
    pub fn ending_at(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: util::days_before(end, days),
            end,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let day = ts.date_naive();
        day >= self.start.date_naive() && day <= self.end.date_naive()
    }

    pub fn start_date(&self) -> String {
        self.start.date_naive().to_string()
    }

    pub fn end_date(&self) -> String {
        self.end.date_naive().to_string()
    }
}

// ------------------------------------------------------------
// Page shapes
// ------------------------------------------------------------
//
// Providers answer with one of:
// - a bare JSON array (single, final page)
// - { "results": [...], "next": "<url>" | null }
// - { "items" | "data": [...], "next_url": "<url>" }
//
#[derive(Debug, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next: Option<String>,
}

const LIST_FIELDS: [&str; 3] = ["results", "items", "data"];
const NEXT_FIELDS: [&str; 2] = ["next", "next_url"];

impl Page {
    pub fn from_value(body: Value) -> Self {
        match body {
            Value::Array(items) => Page { items, next: None },
            Value::Object(mut map) => {
                let items = LIST_FIELDS
                    .iter()
                    .find_map(|f| match map.remove(*f) {
                        Some(Value::Array(items)) => Some(items),
                        _ => None,
                    })
                    .unwrap_or_default();

                let next = NEXT_FIELDS
                    .iter()
                    .find_map(|f| map.get(*f).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);

                Page { items, next }
            }
            _ => Page::default(),
        }
    }
}

// ------------------------------------------------------------
// Field normalization
// ------------------------------------------------------------
//
// Best-effort field name fallback. The first present, parseable
// field wins.
//
const PRICE_FIELDS: [&str; 5] = ["price", "avg", "average", "avgPrice", "price_avg"];
const VOLUME_FIELDS: [&str; 3] = ["volume", "avgVolume", "vol"];
const TIME_FIELDS: [&str; 3] = ["timestamp", "ts", "date"];

/// Normalizes one provider entry into a snapshot.
///
/// Returns `None` when the entry carries no usable timestamp.
pub fn normalize_point(
    provider: &str,
    item_id: i64,
    region_id: i64,
    entry: &Value,
) -> Option<MarketSnapshot> {
    let timestamp = TIME_FIELDS
        .iter()
        .find_map(|f| entry.get(*f).and_then(parse_timestamp))?;

    let spread = number_field(entry, &["spread"]).or_else(|| {
        let high = number_field(entry, &["highest", "high"])?;
        let low = number_field(entry, &["lowest", "low"])?;
        Some(high - low)
    });

    Some(MarketSnapshot {
        provider: provider.to_string(),
        item_id,
        region_id,
        timestamp,
        price: number_field(entry, &PRICE_FIELDS),
        volume: number_field(entry, &VOLUME_FIELDS),
        spread,
        payload: entry.clone(),
        from_sde: false,
    })
}

/// Normalizes a page set, keeps points inside `window` and orders
/// them by timestamp.
pub fn normalize_series(
    provider: &str,
    item_id: i64,
    region_id: i64,
    window: &Window,
    entries: &[Value],
) -> Vec<MarketSnapshot> {
    let mut points: Vec<MarketSnapshot> = entries
        .iter()
        .filter_map(|entry| {
            let point = normalize_point(provider, item_id, region_id, entry);
            if point.is_none() {
                log::debug!("dropping entry without timestamp provider={} item={}", provider, item_id);
            }
            point
        })
        .filter(|p| window.contains(p.timestamp))
        .collect();

    points.sort_by_key(|p| p.timestamp);
    points
}

/// Reads a JSON number or numeric string from the first matching field.
pub fn number_field(entry: &Value, fields: &[&str]) -> Option<f64> {
    fields.iter().find_map(|f| match entry.get(*f)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accepts RFC 3339, naive date-times, plain dates and epoch
/// seconds or milliseconds.
///
/// Examples:
/// - "2025-09-23"                -> 2025-09-23T00:00:00Z
/// - "2025-09-23T12:00:00+02:00" -> 2025-09-23T10:00:00Z
/// - 1758585600                  -> 2025-09-23T00:00:00Z
/// - 1758585600000               -> 2025-09-23T00:00:00Z
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Anything past ~5138 AD in seconds is really milliseconds
            if raw.abs() >= 100_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn day(s: &str) -> DateTime<Utc> {
        parse_timestamp(&json!(s)).unwrap()
    }

    #[test]
    fn page_shapes_normalize() {
        let bare = Page::from_value(json!([{ "date": "2025-09-23" }]));
        assert_eq!(bare.items.len(), 1);
        assert_eq!(bare.next, None);

        let paged = Page::from_value(json!({
            "results": [{ "date": "2025-09-23" }, { "date": "2025-09-24" }],
            "next": "/history?page=2"
        }));
        assert_eq!(paged.items.len(), 2);
        assert_eq!(paged.next.as_deref(), Some("/history?page=2"));

        let last = Page::from_value(json!({ "items": [], "next_url": null }));
        assert!(last.items.is_empty());
        assert_eq!(last.next, None);

        let blank = Page::from_value(json!({ "data": [{}], "next": "" }));
        assert_eq!(blank.items.len(), 1);
        assert_eq!(blank.next, None);

        assert_eq!(Page::from_value(json!("oops")), Page::default());
    }

    #[test]
    fn price_field_fallbacks() {
        for field in ["price", "avg", "average", "avgPrice", "price_avg"] {
            let mut entry = json!({ "date": "2025-09-23" });
            entry[field] = json!(12.5);
            let point = normalize_point("p", 34, 1, &entry).unwrap();
            assert_eq!(point.price, Some(12.5), "field {field}");
        }
    }

    #[test]
    fn numeric_strings_and_spread_from_range() {
        let entry = json!({
            "date": "2025-09-23",
            "average": "5.25",
            "highest": 6.0,
            "lowest": 4.5,
            "volume": "1000"
        });
        let point = normalize_point("esi", 34, 10000002, &entry).unwrap();

        assert_eq!(point.price, Some(5.25));
        assert_eq!(point.volume, Some(1000.0));
        assert_eq!(point.spread, Some(1.5));
        assert_eq!(point.payload, entry);
        assert_eq!(point.timestamp, day("2025-09-23"));
    }

    #[test]
    fn missing_fields_stay_null() {
        let point = normalize_point("p", 1, 1, &json!({ "ts": 1758585600 })).unwrap();
        assert_eq!(point.price, None);
        assert_eq!(point.volume, None);
        assert_eq!(point.spread, None);
    }

    #[test]
    fn entries_without_timestamp_are_dropped() {
        assert!(normalize_point("p", 1, 1, &json!({ "price": 1.0 })).is_none());
        assert!(normalize_point("p", 1, 1, &json!({ "date": "yesterday" })).is_none());
    }

    #[test]
    fn timestamp_formats() {
        let midnight = day("2025-09-23");
        assert_eq!(parse_timestamp(&json!(1758585600)), Some(midnight));
        assert_eq!(parse_timestamp(&json!(1758585600000_i64)), Some(midnight));
        assert_eq!(parse_timestamp(&json!("2025-09-23T00:00:00Z")), Some(midnight));
        assert_eq!(parse_timestamp(&json!("2025-09-23T02:00:00+02:00")), Some(midnight));
        assert_eq!(parse_timestamp(&json!("2025-09-23T00:00:00")), Some(midnight));
    }

    #[test]
    fn huge_window_starts_at_earliest_instant() {
        let end = day("2025-09-24");
        let window = Window::ending_at(end, u32::MAX);
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.end, end);
        assert!(window.contains(day("1970-01-01")));
    }

    #[test]
    fn series_is_windowed_and_sorted() {
        let window = Window::ending_at(day("2025-09-24") + Duration::hours(15), 2);
        let entries = vec![
            json!({ "date": "2025-09-24", "avg": 3.0 }),
            json!({ "date": "2025-09-20", "avg": 0.0 }),
            json!({ "date": "2025-09-22", "avg": 1.0 }),
            json!({ "date": "2025-09-23", "avg": 2.0 }),
            json!({ "avg": 9.0 }),
        ];

        let series = normalize_series("p", 34, 1, &window, &entries);
        let prices: Vec<_> = series.iter().map(|p| p.price.unwrap()).collect();

        assert_eq!(prices, vec![1.0, 2.0, 3.0]);
        assert_eq!(window.start_date(), "2025-09-22");
        assert_eq!(window.end_date(), "2025-09-24");
    }
}
