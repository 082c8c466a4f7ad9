use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use log::info;

use crate::{
    config::SdeConfig,
    error::PipelineError,
    metrics::METRICS,
    schema::{ArtifactEntry, ManifestDescriptor, ManifestRecord},
    util,
};

use super::{extract, extractable_kind, extractable_version};

/// File stem of the type catalog artifact.
pub const TYPES_ARTIFACT: &str = "typeIDs";

/// File stem of the blueprint catalog artifact.
pub const BLUEPRINTS_ARTIFACT: &str = "blueprints";

/// Artifacts a container archive must provide.
pub const REQUIRED_ARTIFACTS: [&str; 2] = [TYPES_ARTIFACT, BLUEPRINTS_ARTIFACT];

// ------------------------------------------------------------
// Pipeline configuration
// ------------------------------------------------------------
//
// Working directories for a single pipeline run.
//
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl From<&SdeConfig> for PipelineConfig {
    fn from(cfg: &SdeConfig) -> Self {
        Self {
            staging_dir: cfg.staging_dir.clone(),
            output_dir: cfg.output_dir.clone(),
            manifest_path: cfg.manifest_path.clone(),
        }
    }
}

/// Turns one SDE archive into an immutable `ManifestRecord`.
///
/// Steps:
/// 1. Pick the extraction strategy from the file extension
/// 2. Extract (flattened) into the staging directory
/// 3. Enforce the required-artifact check
/// 4. Fingerprint the tracked artifacts
/// 5. Write the JSON descriptor (overwriting any previous one)
///
/// FAILURE MODEL:
/// - Every step is fatal to the run; there is no partial success.
/// - The caller decides whether to retry the whole run.
///
pub struct ManifestPipeline {
    config: PipelineConfig,
    archive_path: PathBuf,
}

impl ManifestPipeline {
    pub fn new(config: PipelineConfig, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            archive_path: archive_path.into(),
        }
    }

    pub fn run(&self) -> Result<ManifestRecord, PipelineError> {
        let name = self
            .archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let kind = extractable_kind(&name)
            .ok_or_else(|| PipelineError::UnsupportedArchiveFormat(self.archive_path.clone()))?;

        fs::create_dir_all(&self.config.staging_dir)?;
        fs::create_dir_all(&self.config.output_dir)?;
        if let Some(parent) = self.config.manifest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staged = extract::extract(kind, &self.archive_path, &self.config.staging_dir)
            .map_err(|source| PipelineError::ExtractionFailure {
                path: self.archive_path.clone(),
                source,
            })?;

        // A single staged file is one artifact by definition
        if staged.len() != 1 {
            let missing: Vec<String> = REQUIRED_ARTIFACTS
                .iter()
                .filter(|key| find_artifact(&staged, key).is_none())
                .map(|key| key.to_string())
                .collect();

            if !missing.is_empty() {
                return Err(PipelineError::MissingRequiredArtifact(missing));
            }
        }

        let types_path = find_artifact(&staged, TYPES_ARTIFACT);
        let blueprints_path = find_artifact(&staged, BLUEPRINTS_ARTIFACT);

        let types_fingerprint = fingerprint(types_path)?;
        let blueprints_fingerprint = fingerprint(blueprints_path)?;

        let descriptor = ManifestDescriptor {
            version: extractable_version(&name),
            type_ids: ArtifactEntry {
                path: types_path.map(|p| p.display().to_string()),
                checksum: types_fingerprint.clone(),
            },
            blueprints: ArtifactEntry {
                path: blueprints_path.map(|p| p.display().to_string()),
                checksum: blueprints_fingerprint.clone(),
            },
        };

        fs::write(
            &self.config.manifest_path,
            serde_json::to_string_pretty(&descriptor)?,
        )?;

        info!(
            "manifest written version={} staged={} path={}",
            descriptor.version,
            staged.len(),
            self.config.manifest_path.display()
        );
        METRICS.manifests_written.fetch_add(1, Ordering::Relaxed);

        Ok(ManifestRecord {
            version: descriptor.version,
            types_fingerprint,
            blueprints_fingerprint,
            staged_paths: staged,
            manifest_file: self.config.manifest_path.clone(),
        })
    }
}

/// Finds a staged artifact by file stem, whatever its extension.
fn find_artifact<'a>(staged: &'a extract::Staged, key: &str) -> Option<&'a Path> {
    staged
        .iter()
        .find(|(name, _)| Path::new(name).file_stem().is_some_and(|stem| stem == key))
        .map(|(_, path)| path.as_path())
}

fn fingerprint(path: Option<&Path>) -> Result<Option<String>, PipelineError> {
    match path {
        Some(p) if p.exists() => Ok(Some(util::fingerprint_file(p)?)),
        _ => Ok(None),
    }
}
