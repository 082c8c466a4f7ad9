use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use log::{debug, info, warn};

use crate::{metrics::METRICS, schema::ManifestEvent, util};

use super::{is_transient, watched_kind, watched_version};

/// Polls a downloads directory for new or changed SDE archives.
///
/// The watcher has no timer of its own. The caller decides how often
/// `scan()` runs.
///
/// GUARANTEES:
/// - The same (path, fingerprint) pair is reported at most once
/// - A content change at the same path is reported again
/// - Candidates are processed in lexicographic path order
///
/// STATE:
/// - `seen` grows monotonically for the lifetime of the watcher
///
pub struct ArchiveWatcher {
    downloads_dir: PathBuf,
    seen: HashMap<PathBuf, String>,
}

impl ArchiveWatcher {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            seen: HashMap::new(),
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Scans once and returns events for new or changed archives.
    ///
    /// A missing directory yields an empty list, not an error. Only a
    /// failure to list the directory itself is returned. A candidate
    /// that cannot be read is skipped without being recorded, so it is
    /// picked up again on a later scan.
    pub fn scan(&mut self) -> io::Result<Vec<ManifestEvent>> {
        self.scan_with(util::fingerprint_file)
    }

    fn scan_with<F>(&mut self, fingerprint_of: F) -> io::Result<Vec<ManifestEvent>>
    where
        F: Fn(&Path) -> io::Result<String>,
    {
        let mut events = Vec::new();

        for path in self.candidates()? {
            let fingerprint = match fingerprint_of(&path) {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    warn!("archive unreadable path={} error={}", path.display(), e);
                    METRICS.scan_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if self.seen.get(&path) == Some(&fingerprint) {
                continue;
            }
            self.seen.insert(path.clone(), fingerprint.clone());

            let name = file_name(&path);
            let version = watched_version(&name);

            info!(
                "archive discovered path={} version={} fingerprint={}",
                path.display(),
                version,
                fingerprint
            );
            METRICS.archives_discovered.fetch_add(1, Ordering::Relaxed);

            events.push(ManifestEvent {
                path,
                fingerprint,
                version,
                discovered_at: util::now_utc(),
            });
        }

        Ok(events)
    }

    /// Regular files directly inside the downloads directory that look
    /// like finished archives, sorted by path.
    fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.downloads_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = match entry.and_then(|e| e.file_type().map(|t| (e, t))) {
                Ok((entry, file_type)) if file_type.is_file() => entry,
                Ok(_) => continue,
                Err(e) => {
                    warn!("skipping unreadable directory entry dir={} error={}", self.downloads_dir.display(), e);
                    METRICS.scan_errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let path = entry.path();
            let name = file_name(&path);

            if is_transient(&name) {
                debug!("skipping partial download {}", name);
                continue;
            }
            if watched_kind(&name).is_none() {
                continue;
            }

            let path = fs::canonicalize(&path).unwrap_or(path);
            candidates.push(path);
        }

        candidates.sort();
        Ok(candidates)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
