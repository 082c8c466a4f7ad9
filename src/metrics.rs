use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Global runtime metrics for the ingestion service.
///
/// Purpose:
/// - Track scheduler ticks and rate-limited providers
/// - Track fetch attempts / failures
/// - Track persisted and pruned rows
/// - Track archive discovery and manifest runs
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
///
/// NOTE:
/// Adapter call counters are per instance (see `HistoryClient`),
/// not part of this registry.
#[derive(Default)]
pub struct RuntimeMetrics {
    // Scheduler
    pub ticks: AtomicUsize,
    pub providers_skipped: AtomicUsize,

    // Fetching
    pub fetches_attempted: AtomicUsize,
    pub fetch_failures: AtomicUsize,

    // Persistence
    pub rows_inserted: AtomicUsize,
    pub rows_pruned: AtomicUsize,
    pub store_errors: AtomicUsize,

    // Static data export
    pub archives_discovered: AtomicUsize,
    pub scan_errors: AtomicUsize,
    pub manifests_written: AtomicUsize,
    pub pipeline_failures: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line, low-noise summary for the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "ticks={} skipped={} fetch={} fetch_err={} inserted={} pruned={} store_err={} archives={} scan_err={} manifests={} pipeline_err={}",
            self.ticks.load(Ordering::Relaxed),
            self.providers_skipped.load(Ordering::Relaxed),
            self.fetches_attempted.load(Ordering::Relaxed),
            self.fetch_failures.load(Ordering::Relaxed),
            self.rows_inserted.load(Ordering::Relaxed),
            self.rows_pruned.load(Ordering::Relaxed),
            self.store_errors.load(Ordering::Relaxed),
            self.archives_discovered.load(Ordering::Relaxed),
            self.scan_errors.load(Ordering::Relaxed),
            self.manifests_written.load(Ordering::Relaxed),
            self.pipeline_failures.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
