// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:       Configuration loaded from JSON + environment
// - error:        Typed errors per subsystem
// - schema:       Manifest and market snapshot data model
// - util:         Fingerprinting, time and jitter helpers
// - metrics:      Global runtime counters
// - sde:          Static data export watcher, extraction, manifest pipeline
// - rate_limiter: Per-provider admission control
// - providers:    Market history adapters and adapter registry
// - store:        Idempotent snapshot persistence
// - scheduler:    Periodic fetch → persist → prune loop
//
pub mod config;
pub mod error;
pub mod metrics;
pub mod providers;
pub mod rate_limiter;
pub mod scheduler;
pub mod schema;
pub mod sde;
pub mod store;
pub mod util;
