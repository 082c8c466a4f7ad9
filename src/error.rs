//! Error types for the ingestion service.
//!
//! Each subsystem owns its own error enum:
//! - `PipelineError`: archive extraction and manifest writing (fatal per run)
//! - `FetchError`:    market adapter calls (isolated per item/provider)
//! - `StoreError`:    snapshot persistence
//! - `ConfigError`:   configuration loading and validation
//!
//! Rate limiter denial is NOT an error. It is the `false` outcome of
//! `RateLimiter::acquire`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The archive extension is not one of the supported containers.
    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedArchiveFormat(PathBuf),

    /// An archive that did not stage exactly one file lacks one or both
    /// catalog artifacts. An empty archive lacks both.
    #[error("Missing required SDE artifacts: {}", .0.join(", "))]
    MissingRequiredArtifact(Vec<String>),

    /// Decompression or container parsing failed.
    #[error("Failed to extract {}: {source}", path.display())]
    ExtractionFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// A single attempt failed (network, HTTP status, undecodable body).
    /// Retried internally by the history client.
    #[error("Transient failure from {provider}: {message}")]
    Transient { provider: String, message: String },

    /// Every attempt failed. Surfaced to the scheduler, which treats it
    /// as a failure of one item only.
    #[error("{provider} failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        provider: String,
        attempts: u32,
        last_error: String,
    },

    /// The request could not be built (bad base URL, bad next pointer).
    /// Never retried.
    #[error("Invalid request for {provider}: {message}")]
    InvalidRequest { provider: String, message: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid snapshot payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
