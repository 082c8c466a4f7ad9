use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Central data types shared across the ingestion service.
///
/// These types are exchanged between:
/// - The archive watcher and the manifest pipeline
/// - The manifest pipeline and the (external) catalog loader
/// - Market adapters, the scheduler and the snapshot store
///
/// DESIGN NOTES:
/// - Records produced by the pipeline are immutable once built.
/// - Any change to `ManifestDescriptor` changes the on-disk format
///   consumed by downstream loaders.

// ------------------------------------------------------------
// Manifest event
// ------------------------------------------------------------
//
// Emitted by the watcher once per (path, fingerprint) pair.
// A later fingerprint change for the same path is a new event.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEvent {
    /// Absolute path of the discovered archive
    pub path: PathBuf,

    /// Hex SHA-256 of the archive bytes
    pub fingerprint: String,

    /// File name with its archive extension stripped
    /// Example: "sde-2025-09-23.zip" -> "sde-2025-09-23"
    pub version: String,

    /// Wall-clock time of discovery
    pub discovered_at: DateTime<Utc>,
}

// ------------------------------------------------------------
// Manifest record
// ------------------------------------------------------------
//
// Result of one successful pipeline run. Handed to the catalog
// loader, which reads the staged files listed in `staged_paths`.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub version: String,

    /// Fingerprint of the type catalog artifact (typeIDs.*)
    pub types_fingerprint: Option<String>,

    /// Fingerprint of the blueprint catalog artifact (blueprints.*)
    pub blueprints_fingerprint: Option<String>,

    /// Staged file name -> extracted path
    pub staged_paths: BTreeMap<String, PathBuf>,

    /// Location of the written JSON descriptor
    pub manifest_file: PathBuf,
}

/// On-disk JSON shape of the manifest descriptor.
///
/// Example:
/// {
///   "version": "sde-2025-09-23",
///   "typeIDs":    { "path": "/staging/typeIDs.json",    "checksum": "ab12…" },
///   "blueprints": { "path": "/staging/blueprints.json", "checksum": "cd34…" }
/// }
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestDescriptor {
    pub version: String,

    #[serde(rename = "typeIDs")]
    pub type_ids: ArtifactEntry,

    pub blueprints: ArtifactEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub path: Option<String>,
    pub checksum: Option<String>,
}

// ------------------------------------------------------------
// Market snapshot
// ------------------------------------------------------------
//
// One timestamped observation for an item in a region from a
// given provider.
//
// Identity key: (provider, item_id, region_id, timestamp).
// The store guarantees this tuple is unique.
//
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    /// Provider identifier (e.g. "adam4eve", "esi")
    pub provider: String,

    /// Tradable item (type) id
    pub item_id: i64,

    /// Market region id
    pub region_id: i64,

    /// Observation time (UTC)
    pub timestamp: DateTime<Utc>,

    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub spread: Option<f64>,

    /// Untouched provider entry this snapshot was normalized from
    pub payload: Value,

    /// True when the row came from a static data export rather than
    /// a live provider fetch
    #[serde(default)]
    pub from_sde: bool,
}
