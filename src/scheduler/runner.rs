use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::{StreamExt, stream};
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

use crate::{
    error::StoreError,
    metrics::METRICS,
    providers::MarketAdapter,
    rate_limiter::RateLimiter,
    schema::MarketSnapshot,
    store::SnapshotStore,
    util,
};

use super::{RunSummary, SchedulerConfig, SchedulerState, TickReport};

/// Periodic, rate-limited market snapshot collector.
///
/// DESIGN:
/// - One tick in flight at a time
/// - Rate limiter admission once per provider per tick
/// - Items of one provider are fetched concurrently (bounded)
/// - Failures are isolated per item (fetch) or per provider (write)
///
/// The scheduler depends only on `MarketAdapter` and `SnapshotStore`;
/// it never sees provider-specific code.
pub struct MarketScheduler {
    store: Arc<dyn SnapshotStore>,
    adapters: Vec<Arc<dyn MarketAdapter>>,
    limiter: Arc<RateLimiter>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl MarketScheduler {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        adapters: Vec<Arc<dyn MarketAdapter>>,
        limiter: Arc<RateLimiter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            limiter,
            config,
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: SchedulerState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    /// Runs synchronous store work on the blocking pool.
    async fn with_store<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn SnapshotStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || work(store.as_ref())).await?
    }

    /// Executes exactly one tick.
    ///
    /// ORDER:
    /// 1. Fetch every admitted provider
    /// 2. Persist each provider's batch (idempotent)
    /// 3. Prune rows older than the retention window
    ///
    /// Pruning runs even when every provider was skipped.
    pub async fn run_once(&self) -> TickReport {
        METRICS.ticks.fetch_add(1, Ordering::Relaxed);
        let mut report = TickReport::default();

        // --------------------------------------------------
        // FETCHING
        // --------------------------------------------------
        self.set_state(SchedulerState::Fetching);
        let mut batches = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let provider = adapter.provider();

            if !self.limiter.acquire(provider) {
                info!("provider skipped provider={} reason=rate_limited", provider);
                METRICS.providers_skipped.fetch_add(1, Ordering::Relaxed);
                report.skipped_providers += 1;
                continue;
            }

            report.providers_run += 1;
            report.attempted += self.config.item_ids.len();
            let (points, failures) = self.fetch_provider(adapter).await;
            report.failures += failures;
            batches.push((provider, points));
        }

        // --------------------------------------------------
        // PERSISTING
        // --------------------------------------------------
        // One transaction per provider, so a failed write only
        // loses that provider's batch.
        //
        self.set_state(SchedulerState::Persisting);
        for (provider, points) in batches {
            let fetched = points.len();
            match self.with_store(move |store| store.insert_snapshots(&points)).await {
                Ok(inserted) => {
                    info!(
                        "rows inserted provider={} fetched={} inserted={}",
                        provider, fetched, inserted
                    );
                    METRICS.rows_inserted.fetch_add(inserted, Ordering::Relaxed);
                    report.inserted += inserted;
                }
                Err(e) => {
                    error!("persist failed provider={} rows={} error={}", provider, fetched, e);
                    METRICS.store_errors.fetch_add(1, Ordering::Relaxed);
                    report.failures += 1;
                }
            }
        }

        // --------------------------------------------------
        // PRUNING
        // --------------------------------------------------
        self.set_state(SchedulerState::Pruning);
        let cutoff = util::days_before(util::now_utc(), self.config.retention_days);
        match self.with_store(move |store| store.prune_older_than(cutoff)).await {
            Ok(pruned) => {
                info!("rows pruned cutoff={} pruned={}", cutoff.to_rfc3339(), pruned);
                METRICS.rows_pruned.fetch_add(pruned, Ordering::Relaxed);
                report.pruned = pruned;
            }
            Err(e) => {
                // Deferred to the next tick; the delete is transactional.
                error!("prune failed cutoff={} error={}", cutoff.to_rfc3339(), e);
                METRICS.store_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        info!(
            "tick complete providers={} skipped={} attempted={} inserted={} pruned={} failures={}",
            report.providers_run,
            report.skipped_providers,
            report.attempted,
            report.inserted,
            report.pruned,
            report.failures
        );

        report
    }

    /// Fetches every configured item from one provider.
    ///
    /// Returns all collected points plus the number of failed items.
    async fn fetch_provider(&self, adapter: &Arc<dyn MarketAdapter>) -> (Vec<MarketSnapshot>, usize) {
        let provider = adapter.provider();
        let window_days = self.config.window_days;
        info!(
            "fetch attempted provider={} items={} window_days={}",
            provider,
            self.config.item_ids.len(),
            window_days
        );

        let results: Vec<_> = stream::iter(self.config.item_ids.iter().copied())
            .map(|item_id| {
                let adapter = adapter.clone();
                async move {
                    METRICS.fetches_attempted.fetch_add(1, Ordering::Relaxed);
                    debug!("fetching provider={} item={}", provider, item_id);
                    (item_id, adapter.fetch(item_id, window_days).await)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut points = Vec::new();
        let mut failures = 0;

        for (item_id, result) in results {
            match result {
                Ok(mut series) => points.append(&mut series),
                Err(e) => {
                    warn!("fetch failed provider={} item={} error={}", provider, item_id, e);
                    METRICS.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    failures += 1;
                }
            }
        }

        (points, failures)
    }

    /// Runs ticks until `cancel` becomes `true`.
    ///
    /// CANCELLATION:
    /// - Checked before every tick and during the sleep
    /// - A tick in progress is completed, never abandoned halfway
    /// - A dropped sender counts as cancellation
    ///
    /// The sleep is the jittered interval minus the time the tick
    /// took, floored at zero.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> RunSummary {
        let mut summary = RunSummary::default();

        info!(
            "scheduler started providers={} items={} interval_secs={} jitter={}",
            self.adapters.len(),
            self.config.item_ids.len(),
            self.config.interval.as_secs(),
            self.config.jitter
        );

        loop {
            if *cancel.borrow_and_update() {
                break;
            }

            let started = Instant::now();
            let report = self.run_once().await;
            summary.ticks += 1;
            summary.inserted += report.inserted;

            if *cancel.borrow_and_update() {
                break;
            }

            self.set_state(SchedulerState::Sleeping);
            let pause = util::jittered(self.config.interval, self.config.jitter)
                .saturating_sub(started.elapsed());

            if wait_or_cancel(&mut cancel, pause).await {
                break;
            }
        }

        self.set_state(SchedulerState::Stopped);
        info!("scheduler stopped ticks={} inserted={}", summary.ticks, summary.inserted);
        summary
    }
}

/// Sleeps for `pause`; returns `true` if cancelled first.
async fn wait_or_cancel(cancel: &mut watch::Receiver<bool>, pause: Duration) -> bool {
    let timer = sleep(pause);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = &mut timer => return false,
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow_and_update() {
                    return true;
                }
            }
        }
    }
}
