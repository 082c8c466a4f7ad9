//! Market provider registry and factory
//!
//! This module provides:
//! - Central registration of all supported market data providers
//! - A factory function to resolve adapters by configured name
//!
//! All provider-specific logic must live in dedicated adapter modules.
//! The rest of the application must interact exclusively through
//! the `MarketAdapter` trait.

pub mod adapter;
pub mod client;
mod adam4eve;
mod esi;
mod fuzzwork;
mod stub;

use std::sync::Arc;

use log::{error, info, warn};

use crate::config::ProviderConfig;
use crate::error::FetchError;

pub use adam4eve::Adam4EveAdapter;
pub use adapter::MarketAdapter;
pub use esi::EsiAdapter;
pub use fuzzwork::FuzzworkAdapter;
pub use stub::StubAdapter;

/// Builds one adapter from its configuration and the target region.
pub type Constructor = fn(&ProviderConfig, i64) -> Result<Arc<dyn MarketAdapter>, FetchError>;

/// Static name -> constructor table.
///
/// CONTRACT:
/// - Names are lowercase and stable
/// - Names match `providers[].name` in configuration
const REGISTRY: [(&str, Constructor); 4] = [
    ("adam4eve", build_adam4eve),
    ("esi", build_esi),
    ("fuzzwork", build_fuzzwork),
    ("stub", build_stub),
];

fn build_adam4eve(cfg: &ProviderConfig, region_id: i64) -> Result<Arc<dyn MarketAdapter>, FetchError> {
    Ok(Arc::new(Adam4EveAdapter::new(cfg, region_id)?))
}

fn build_esi(cfg: &ProviderConfig, region_id: i64) -> Result<Arc<dyn MarketAdapter>, FetchError> {
    Ok(Arc::new(EsiAdapter::new(cfg, region_id)?))
}

fn build_fuzzwork(cfg: &ProviderConfig, region_id: i64) -> Result<Arc<dyn MarketAdapter>, FetchError> {
    Ok(Arc::new(FuzzworkAdapter::new(cfg, region_id)?))
}

fn build_stub(_cfg: &ProviderConfig, region_id: i64) -> Result<Arc<dyn MarketAdapter>, FetchError> {
    Ok(Arc::new(StubAdapter::new(region_id)))
}

/// Names of every registered provider.
pub fn supported() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

/// Returns an adapter instance for a provider configuration.
///
/// RETURNS:
/// - `None` if the provider name is unknown
/// - `Some(Err(_))` if the adapter could not be built (bad base URL, …)
/// - `Some(Ok(_))` otherwise
///
/// THREADING:
/// - Adapters are wrapped in `Arc` and shared across tasks
///
pub fn get_adapter(
    cfg: &ProviderConfig,
    region_id: i64,
) -> Option<Result<Arc<dyn MarketAdapter>, FetchError>> {
    let name = cfg.name.to_lowercase();
    REGISTRY
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, build)| build(cfg, region_id))
}

/// Builds every enabled provider, skipping unknown or broken ones.
///
/// Unknown names never abort startup; they are logged and ignored.
pub fn build_adapters(providers: &[ProviderConfig], region_id: i64) -> Vec<Arc<dyn MarketAdapter>> {
    let mut adapters = Vec::new();

    for cfg in providers.iter().filter(|p| p.enabled) {
        match get_adapter(cfg, region_id) {
            None => warn!(
                "provider '{}' is not supported (known: {})",
                cfg.name,
                supported().collect::<Vec<_>>().join(", ")
            ),
            Some(Err(e)) => error!("provider '{}' could not be built: {}", cfg.name, e),
            Some(Ok(adapter)) => {
                info!("provider registered provider={} region={}", adapter.provider(), region_id);
                adapters.push(adapter);
            }
        }
    }

    adapters
}
