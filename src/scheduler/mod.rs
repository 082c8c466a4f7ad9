//! Market scheduler
//!
//! This module provides:
//! - The scheduler state machine and its tick/run reports
//! - The long-lived, cancellable collection loop (`runner`)
//!
//! One tick:
//!   Idle → Fetching → Persisting → Pruning → Sleeping → (next tick)
//!
//! The loop stops only when the cancellation channel flips to `true`.

pub mod runner;

use std::time::Duration;

use crate::config::MarketConfig;

pub use runner::MarketScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Fetching,
    Persisting,
    Pruning,
    Sleeping,
    Stopped,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Rows actually added to the store (duplicates excluded)
    pub inserted: usize,
    pub pruned: usize,
    /// Per-item fetch failures plus failed provider writes
    pub failures: usize,
    /// Providers denied by the rate limiter this tick
    pub skipped_providers: usize,
    pub providers_run: usize,
    /// Item fetches started across all admitted providers
    pub attempted: usize,
}

/// Outcome of a whole `run` until cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: usize,
    pub inserted: usize,
}

// ------------------------------------------------------------
// Scheduler parameters
// ------------------------------------------------------------
//
// Derived from `MarketConfig`; kept separate so tests can build a
// scheduler without a full configuration tree.
//
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub item_ids: Vec<i64>,
    pub window_days: u32,
    pub retention_days: u32,
    pub interval: Duration,
    /// Fraction of `interval`, e.g. 0.1 = ±10%
    pub jitter: f64,
    /// Parallel item fetches per provider
    pub concurrency: usize,
}

impl From<&MarketConfig> for SchedulerConfig {
    fn from(cfg: &MarketConfig) -> Self {
        Self {
            item_ids: cfg.item_ids.clone(),
            window_days: cfg.window_days,
            retention_days: cfg.retention_days,
            interval: cfg.interval(),
            jitter: cfg.jitter,
            concurrency: cfg.concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_derived_from_market_section() {
        let mut market = MarketConfig::default();
        market.item_ids = vec![34, 35];
        market.concurrency = 0;

        let cfg = SchedulerConfig::from(&market);
        assert_eq!(cfg.item_ids, vec![34, 35]);
        assert_eq!(cfg.interval, Duration::from_secs(900));
        assert_eq!(cfg.retention_days, 90);
        assert_eq!(cfg.concurrency, 1);
    }
}
