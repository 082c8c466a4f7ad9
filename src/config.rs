use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level configuration loaded from `config.json` and then
// overridden from the environment.
//
// It defines:
// - Static data export directories (watcher + pipeline)
// - Market scheduler parameters
// - Rate limiter parameters
// - Enabled market providers
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub sde: SdeConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Market providers, resolved through the provider registry
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Interval of the periodic `[METRICS]` log line
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

// ------------------------------------------------------------
// Static data export configuration
// ------------------------------------------------------------
//
// Directories used by the archive watcher and the manifest
// pipeline.
//
// Notes:
// - `downloads_dir` is scanned non-recursively.
// - `staging_dir` receives flattened archive members.
// - `manifest_path` is overwritten on every successful run.
//
#[derive(Debug, Deserialize, Clone)]
pub struct SdeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,

    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,

    /// Watcher poll cadence in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

// ------------------------------------------------------------
// Market scheduler configuration
// ------------------------------------------------------------
//
// Controls the tick cadence, the fetched item universe and the
// retention window.
//
// IMPORTANT:
// - `jitter` is a fraction (0.1 = ±10%), not a duration.
// - Rows older than `retention_days` are deleted on every tick.
//
#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    /// Base interval between ticks in seconds
    #[serde(default = "default_market_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// History window requested from providers, in days
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Item (type) ids fetched on every tick
    #[serde(default)]
    pub item_ids: Vec<i64>,

    #[serde(default = "default_region_id")]
    pub region_id: i64,

    /// Parallel item fetches per provider within one tick
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// SQLite database file holding `market_snapshots`
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

// ------------------------------------------------------------
// Rate limiter configuration
// ------------------------------------------------------------
//
// At most `rate` admissions per provider key per `interval_secs`.
//
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate")]
    pub rate: u32,

    #[serde(default = "default_rate_interval")]
    pub interval_secs: f64,
}

// ------------------------------------------------------------
// Provider configuration
// ------------------------------------------------------------
//
// One entry per market data provider.
//
// CONTRACT:
// - `name` must match a key known to the provider registry
//   ("adam4eve", "esi", "fuzzwork", "stub").
// - Provider quirks are expressed here, never as code forks.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overrides the provider's default API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Total attempts per outbound call (first try included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubled on every further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Extra random delay as a fraction of the backoff delay
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// Provider entry with default retry settings.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            base_url: None,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_jitter: default_backoff_jitter(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SdeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            downloads_dir: default_downloads_dir(),
            staging_dir: default_staging_dir(),
            output_dir: default_output_dir(),
            manifest_path: default_manifest_path(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_market_interval(),
            jitter: default_jitter(),
            retention_days: default_retention_days(),
            window_days: default_window_days(),
            item_ids: Vec::new(),
            region_id: default_region_id(),
            concurrency: default_concurrency(),
            database_path: default_database_path(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            interval_secs: default_rate_interval(),
        }
    }
}

impl MarketConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl RateLimitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

/// Upper bound for `market.retention_days` (about a century)
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Upper bound for `market.window_days`
pub const MAX_WINDOW_DAYS: u32 = 3_650;

fn default_true() -> bool {
    true
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("data/output/manifest.json")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_market_interval() -> u64 {
    900
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retention_days() -> u32 {
    90
}

fn default_window_days() -> u32 {
    7
}

fn default_region_id() -> i64 {
    10000002
}

fn default_concurrency() -> usize {
    4
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/market.sqlite")
}

fn default_rate() -> u32 {
    60
}

fn default_rate_interval() -> f64 {
    60.0
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_metrics_interval() -> u64 {
    60
}

// ------------------------------------------------------------
// Loading
// ------------------------------------------------------------

impl Config {
    /// Reads a JSON configuration file, applies environment
    /// overrides and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut cfg = Self::from_json(&data)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Applies `INGEST_*` / `MARKET_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INGEST_DOWNLOADS_DIR") {
            self.sde.downloads_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("INGEST_STAGING_DIR") {
            self.sde.staging_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("INGEST_OUTPUT_DIR") {
            self.sde.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("INGEST_MANIFEST_PATH") {
            self.sde.manifest_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("INGEST_DATABASE_PATH") {
            self.market.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MARKET_INTERVAL_SECS") {
            self.market.interval_secs = parse_value("MARKET_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("MARKET_JITTER") {
            self.market.jitter = parse_value("MARKET_JITTER", &v)?;
        }
        if let Some(v) = lookup("MARKET_RETENTION_DAYS") {
            self.market.retention_days = parse_value("MARKET_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = lookup("MARKET_REGION_ID") {
            self.market.region_id = parse_value("MARKET_REGION_ID", &v)?;
        }
        if let Some(v) = lookup("MARKET_ITEM_IDS") {
            self.market.item_ids = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value("MARKET_ITEM_IDS", s))
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    /// Rejects values the scheduler or limiter cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.market.jitter) {
            return Err(invalid("market.jitter", "must be within [0, 1]"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.market.retention_days) {
            return Err(invalid(
                "market.retention_days",
                &format!("must be within [1, {}]", MAX_RETENTION_DAYS),
            ));
        }
        if self.market.interval_secs == 0 {
            return Err(invalid("market.interval_secs", "must be at least 1"));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.market.window_days) {
            return Err(invalid(
                "market.window_days",
                &format!("must be within [1, {}]", MAX_WINDOW_DAYS),
            ));
        }
        if self.market.concurrency == 0 {
            return Err(invalid("market.concurrency", "must be at least 1"));
        }
        if self.rate_limit.rate == 0 {
            return Err(invalid("rate_limit.rate", "must be at least 1"));
        }
        if !(self.rate_limit.interval_secs > 0.0) {
            return Err(invalid("rate_limit.interval_secs", "must be positive"));
        }
        if self.sde.poll_interval_secs == 0 {
            return Err(invalid("sde.poll_interval_secs", "must be at least 1"));
        }

        let any_enabled = self.providers.iter().any(|p| p.enabled);
        if any_enabled && self.market.item_ids.is_empty() {
            return Err(invalid("market.item_ids", "must not be empty while providers are enabled"));
        }

        for p in &self.providers {
            if p.max_attempts == 0 {
                return Err(invalid(
                    &format!("providers.{}.max_attempts", p.name),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, &format!("cannot parse '{}'", raw)))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn example_config_is_valid() {
        let cfg = Config::from_json(include_str!("../config.example.json")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.providers.len(), 4);
        assert_eq!(cfg.market.item_ids, vec![34, 35, 36, 37]);
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.market.retention_days, 90);
        assert_eq!(cfg.market.region_id, 10000002);
        assert_eq!(cfg.rate_limit.rate, 60);
        assert!(cfg.providers.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn provider_entries_get_retry_defaults() {
        let cfg = Config::from_json(
            r#"{
                "market": { "item_ids": [34, 35] },
                "providers": [{ "name": "esi" }, { "name": "adam4eve", "max_attempts": 2 }]
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.providers[0].max_attempts, 5);
        assert_eq!(cfg.providers[1].max_attempts, 2);
        assert!(cfg.providers[0].enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = Config::from_json(r#"{ "market": { "item_ids": [1] } }"#).unwrap();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MARKET_ITEM_IDS", "34, 35,36"),
            ("MARKET_JITTER", "0.25"),
            ("INGEST_DOWNLOADS_DIR", "/srv/sde"),
        ]);

        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.market.item_ids, vec![34, 35, 36]);
        assert_eq!(cfg.market.jitter, 0.25);
        assert_eq!(cfg.sde.downloads_dir, PathBuf::from("/srv/sde"));
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut cfg = Config::from_json("{}").unwrap();
        let err = cfg
            .apply_overrides(|k| (k == "MARKET_RETENTION_DAYS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MARKET_RETENTION_DAYS"));
    }

    #[test]
    fn validation_catches_bad_values() {
        let cfg = Config::from_json(r#"{ "market": { "jitter": 1.5 } }"#).unwrap();
        assert!(cfg.validate().is_err());

        let cfg = Config::from_json(r#"{ "providers": [{ "name": "esi" }] }"#).unwrap();
        assert!(cfg.validate().is_err());

        let cfg = Config::from_json(r#"{ "market": { "retention_days": 0 } }"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn day_counts_are_bounded() {
        let cfg = Config::from_json(r#"{ "market": { "retention_days": 4000000000 } }"#).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "market.retention_days"
        ));

        let cfg = Config::from_json(r#"{ "market": { "window_days": 4000000000 } }"#).unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "market.window_days"
        ));

        let mut cfg = Config::from_json("{}").unwrap();
        cfg.market.retention_days = MAX_RETENTION_DAYS;
        cfg.market.window_days = MAX_WINDOW_DAYS;
        assert!(cfg.validate().is_ok());
    }
}
