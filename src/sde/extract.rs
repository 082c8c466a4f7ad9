//! Archive extraction strategies.
//!
//! Every strategy FLATTENS the archive: only the base file name of each
//! member is kept and written directly into the staging directory.
//! Directory entries and members without a usable file name are skipped.
//! Later members with the same base name overwrite earlier ones.
//!
//! A member that cannot be opened or read is logged and skipped, and any
//! partially written file is removed. Only failures of the container
//! itself or of the staging directory abort.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use bzip2::read::MultiBzDecoder;
use flate2::read::GzDecoder;
use log::{debug, warn};

use super::ArchiveKind;

/// Staged file name -> extracted path
pub type Staged = BTreeMap<String, PathBuf>;

/// Extracts `archive` into `staging_dir` using the strategy for `kind`.
///
/// Plain `.tar` is not extractable and reported as `Unsupported`.
pub fn extract(kind: ArchiveKind, archive: &Path, staging_dir: &Path) -> io::Result<Staged> {
    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, staging_dir),
        ArchiveKind::Zip => extract_zip(archive, staging_dir),
        ArchiveKind::Bzip2 => extract_bz2(archive, staging_dir),
        ArchiveKind::Tar => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "uncompressed tar archives are not extracted",
        )),
    }
}

fn extract_tar_gz(archive: &Path, staging_dir: &Path) -> io::Result<Staged> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut staged = Staged::new();

    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = match entry.path() {
            Ok(path) => member_file_name(&path),
            Err(e) => {
                debug!("skipping tar member with unreadable name: {}", e);
                None
            }
        };
        let Some(name) = name else { continue };

        let destination = staging_dir.join(&name);
        if let Err(e) = copy_member(&mut entry, &destination)? {
            warn!("skipping unreadable tar member {}: {}", name, e);
            staged.remove(&name);
            continue;
        }
        staged.insert(name, destination);
    }

    Ok(staged)
}

fn extract_zip(archive: &Path, staging_dir: &Path) -> io::Result<Staged> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(io::Error::other)?;
    let mut staged = Staged::new();

    for index in 0..zip.len() {
        let mut member = match zip.by_index(index) {
            Ok(member) => member,
            Err(e) => {
                warn!("skipping unreadable zip member #{}: {}", index, e);
                continue;
            }
        };
        if member.is_dir() {
            continue;
        }

        let Some(name) = member_file_name(Path::new(member.name())) else {
            debug!("skipping zip member #{} without a file name", index);
            continue;
        };

        let destination = staging_dir.join(&name);
        if let Err(e) = copy_member(&mut member, &destination)? {
            warn!("skipping unreadable zip member {}: {}", name, e);
            staged.remove(&name);
            continue;
        }
        staged.insert(name, destination);
    }

    Ok(staged)
}

/// Streams one member into `destination`.
///
/// The outer result is a staging failure and aborts the archive. The
/// inner one is a read failure of the member: the partial file is
/// removed and the error handed back so the caller can skip it.
fn copy_member(member: &mut impl Read, destination: &Path) -> io::Result<io::Result<()>> {
    let mut out = File::create(destination)?;
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = match member.read(&mut buf) {
            Ok(0) => return Ok(Ok(())),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                drop(out);
                if let Err(rm) = fs::remove_file(destination) {
                    debug!("could not remove partial {}: {}", destination.display(), rm);
                }
                return Ok(Err(e));
            }
        };
        out.write_all(&buf[..n])?;
    }
}

/// A `.bz2` file is a single compressed artifact, not a container.
/// The staged name is the archive name without its last extension
/// ("typeIDs.json.bz2" -> "typeIDs.json").
fn extract_bz2(archive: &Path, staging_dir: &Path) -> io::Result<Staged> {
    let name = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "archive has no file name"))?;

    let file = File::open(archive)?;
    let mut decoder = MultiBzDecoder::new(BufReader::new(file));

    let destination = staging_dir.join(&name);
    let mut out = File::create(&destination)?;
    io::copy(&mut decoder, &mut out)?;

    Ok(Staged::from([(name, destination)]))
}

/// Base name of an archive member, if it has a usable one.
fn member_file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
