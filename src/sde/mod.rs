/// Static data export (SDE) module
///
/// This module groups all logic responsible for:
/// - Discovering new or changed SDE archives (watcher)
/// - Extracting and fingerprinting archive contents (pipeline)
/// - Writing the manifest descriptor for the catalog loader
///
/// Design notes:
/// - No network or database access lives here
/// - Archive-format knowledge is centralized in `ArchiveKind`
pub mod extract;
pub mod pipeline;
pub mod watcher;

/// Transient-write suffixes. Files ending in these are still being
/// downloaded and must be ignored.
pub const TRANSIENT_SUFFIXES: [&str; 2] = [".part", ".tmp"];

/// Container formats recognized by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// gzip-compressed tar (`.tar.gz`, `.tgz`)
    TarGz,

    /// zip container
    Zip,

    /// Single bzip2-compressed file, not a container
    Bzip2,

    /// Uncompressed tar (watched, but not extractable)
    Tar,
}

/// Extensions the watcher reports, longest first so that `.tar.gz`
/// wins over `.tar`.
const WATCHED: [(&str, ArchiveKind); 4] = [
    (".tar.gz", ArchiveKind::TarGz),
    (".zip", ArchiveKind::Zip),
    (".bz2", ArchiveKind::Bzip2),
    (".tar", ArchiveKind::Tar),
];

/// Extensions the pipeline knows how to extract, longest first.
const EXTRACTABLE: [(&str, ArchiveKind); 4] = [
    (".tar.gz", ArchiveKind::TarGz),
    (".tgz", ArchiveKind::TarGz),
    (".zip", ArchiveKind::Zip),
    (".bz2", ArchiveKind::Bzip2),
];

fn match_suffix(
    name: &str,
    table: &[(&'static str, ArchiveKind)],
) -> Option<(&'static str, ArchiveKind)> {
    let lower = name.to_lowercase();
    table
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(ext, kind)| (*ext, *kind))
}

/// Kind of a file the watcher should report, if any.
pub fn watched_kind(name: &str) -> Option<ArchiveKind> {
    match_suffix(name, &WATCHED).map(|(_, kind)| kind)
}

/// Kind of a file the pipeline can extract, if any.
pub fn extractable_kind(name: &str) -> Option<ArchiveKind> {
    match_suffix(name, &EXTRACTABLE).map(|(_, kind)| kind)
}

/// Whether `name` is a partially written download.
pub fn is_transient(name: &str) -> bool {
    let lower = name.to_lowercase();
    TRANSIENT_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Version label derived by the watcher.
///
/// Examples:
/// - "sde-2025-09-23.zip"    -> "sde-2025-09-23"
/// - "sde-2025-09-23.TAR.GZ" -> "sde-2025-09-23"
/// - "sde.tar"               -> "sde"
pub fn watched_version(name: &str) -> String {
    strip(name, &WATCHED)
}

/// Version label derived by the pipeline (`.tgz` included).
pub fn extractable_version(name: &str) -> String {
    strip(name, &EXTRACTABLE)
}

/// One watcher poll: scan, then run the pipeline for every event.
///
/// A failed pipeline run is logged and counted but does not stop the
/// remaining events. The watcher has already recorded the archive's
/// fingerprint, so unchanged content is not retried.
///
/// Returns the manifests written during this poll.
pub fn poll_once(
    watcher: &mut watcher::ArchiveWatcher,
    config: &pipeline::PipelineConfig,
) -> std::io::Result<Vec<crate::schema::ManifestRecord>> {
    let mut records = Vec::new();

    for event in watcher.scan()? {
        match pipeline::ManifestPipeline::new(config.clone(), event.path.clone()).run() {
            Ok(record) => records.push(record),
            Err(e) => {
                log::error!(
                    "pipeline failed archive={} version={} error={}",
                    event.path.display(),
                    event.version,
                    e
                );
                crate::metrics::METRICS
                    .pipeline_failures
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }

    Ok(records)
}

fn strip(name: &str, table: &[(&'static str, ArchiveKind)]) -> String {
    match match_suffix(name, table) {
        // Suffixes are ASCII, so the byte length is the same in any case
        Some((ext, _)) => name[..name.len() - ext.len()].to_string(),
        None => std::path::Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_suffix_wins() {
        assert_eq!(watched_kind("sde.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(watched_kind("sde.tar"), Some(ArchiveKind::Tar));
        assert_eq!(watched_kind("sde.ZIP"), Some(ArchiveKind::Zip));
        assert_eq!(watched_kind("sde.tgz"), None);
        assert_eq!(watched_kind("notes.txt"), None);
    }

    #[test]
    fn extractable_set_excludes_plain_tar() {
        assert_eq!(extractable_kind("sde.tgz"), Some(ArchiveKind::TarGz));
        assert_eq!(extractable_kind("sde.bz2"), Some(ArchiveKind::Bzip2));
        assert_eq!(extractable_kind("sde.tar"), None);
    }

    #[test]
    fn versions_strip_recognized_suffix() {
        assert_eq!(watched_version("sde-2025-09-23.zip"), "sde-2025-09-23");
        assert_eq!(watched_version("sde-2025-09-23.tar.gz"), "sde-2025-09-23");
        assert_eq!(watched_version("Sde.TAR.GZ"), "Sde");
        assert_eq!(extractable_version("sde-1.tgz"), "sde-1");
        assert_eq!(extractable_version("sde-1.rar"), "sde-1");
    }

    #[test]
    fn transient_files_are_detected() {
        assert!(is_transient("sde.zip.part"));
        assert!(is_transient("sde.tar.gz.TMP"));
        assert!(!is_transient("sde.zip"));
    }
}
