// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use sde_market_ingest::{
    config::{Config, SdeConfig},
    metrics::METRICS,
    providers::build_adapters,
    rate_limiter::RateLimiter,
    scheduler::{MarketScheduler, SchedulerConfig},
    sde::{self, pipeline::PipelineConfig, watcher::ArchiveWatcher},
    store::{SnapshotStore, SqliteSnapshotStore},
};

const DEFAULT_CONFIG_PATH: &str = "config.json";

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Long-running ingestion service.
//
// Responsibilities:
// - Load configuration (file + environment)
// - Open the snapshot store
// - Start the archive watcher loop
// - Run the market scheduler until Ctrl-C
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;

    // --------------------------------------------------------
    // Cancellation
    //
    // Ctrl-C flips the watch channel; both loops observe it
    // and the process exits once both have stopped.
    // --------------------------------------------------------
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!("failed to listen for Ctrl-C: {}", e),
        }
        let _ = cancel_tx.send(true);
    });

    // --------------------------------------------------------
    // Metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let metrics_every = Duration::from_secs(config.metrics_interval_secs.max(1));
    tokio::spawn(async move {
        loop {
            sleep(metrics_every).await;
            info!("[METRICS] {}", METRICS.summary());
        }
    });

    // --------------------------------------------------------
    // Static data export watcher
    // --------------------------------------------------------
    let archive_loop = config
        .sde
        .enabled
        .then(|| tokio::spawn(run_archive_loop(config.sde.clone(), cancel_rx.clone())));

    // --------------------------------------------------------
    // Market scheduler
    // --------------------------------------------------------
    let store: Arc<dyn SnapshotStore> = Arc::new(
        SqliteSnapshotStore::open(&config.market.database_path).with_context(|| {
            format!("opening snapshot store {}", config.market.database_path.display())
        })?,
    );

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.rate,
        config.rate_limit.interval(),
    ));

    let adapters = build_adapters(&config.providers, config.market.region_id);
    if adapters.is_empty() {
        warn!("no market providers enabled, ticks will only prune");
    }

    let scheduler = MarketScheduler::new(
        store,
        adapters,
        limiter,
        SchedulerConfig::from(&config.market),
    );
    let summary = scheduler.run(cancel_rx).await;

    if let Some(handle) = archive_loop {
        if let Err(e) = handle.await {
            error!("archive watcher task failed: {}", e);
        }
    }

    info!(
        "ingestion stopped ticks={} inserted={} [METRICS] {}",
        summary.ticks,
        summary.inserted,
        METRICS.summary()
    );
    Ok(())
}

// ------------------------------------------------------------
// Archive watcher loop
// ------------------------------------------------------------
//
// Polls the downloads directory every `poll_interval_secs` and
// runs the manifest pipeline for each new or changed archive.
//
// Scanning and extraction are blocking file I/O, so every poll
// runs on the blocking pool with the watcher moved in and back.
//
async fn run_archive_loop(cfg: SdeConfig, mut cancel: watch::Receiver<bool>) {
    let pipeline_cfg = PipelineConfig::from(&cfg);
    let every = Duration::from_secs(cfg.poll_interval_secs);
    let mut watcher = ArchiveWatcher::new(&cfg.downloads_dir);

    info!(
        "archive watcher started dir={} poll_secs={}",
        cfg.downloads_dir.display(),
        cfg.poll_interval_secs
    );

    while !*cancel.borrow_and_update() {
        let pcfg = pipeline_cfg.clone();
        let polled = tokio::task::spawn_blocking(move || {
            let result = sde::poll_once(&mut watcher, &pcfg);
            (watcher, result)
        })
        .await;

        match polled {
            Ok((w, result)) => {
                watcher = w;
                if let Err(e) = result {
                    error!(
                        "archive scan failed dir={} error={}",
                        watcher.downloads_dir().display(),
                        e
                    );
                }
            }
            Err(e) => {
                error!("archive poll task failed: {}", e);
                break;
            }
        }

        tokio::select! {
            _ = sleep(every) => {}
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("archive watcher stopped");
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Path resolution order:
// 1. `--config <path>` (or `-c <path>`)
// 2. INGEST_CONFIG
// 3. ./config.json
//
// A missing default file falls back to built-in defaults plus
// environment overrides; an explicitly named file must exist.
//
fn load_config() -> anyhow::Result<Config> {
    let mut args = std::env::args().skip(1);
    let mut explicit = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                explicit = Some(PathBuf::from(
                    args.next().context("--config requires a path")?,
                ));
            }
            other => warn!("ignoring unknown argument '{}'", other),
        }
    }

    let explicit = explicit.or_else(|| std::env::var_os("INGEST_CONFIG").map(PathBuf::from));

    let config = match explicit {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Config::load(&path)?
            } else {
                warn!("{} not found, using defaults", DEFAULT_CONFIG_PATH);
                let mut cfg = Config::from_json("{}")?;
                cfg.apply_env()?;
                cfg.validate()?;
                cfg
            }
        }
    };

    info!(
        "configuration loaded providers={} items={} region={} db={}",
        config.providers.iter().filter(|p| p.enabled).count(),
        config.market.item_ids.len(),
        config.market.region_id,
        config.market.database_path.display()
    );
    Ok(config)
}
