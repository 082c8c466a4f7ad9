/// Utility helpers used by the watcher, the pipeline and the scheduler.
///
/// This module contains:
/// - Content fingerprinting (streaming SHA-256)
/// - Jitter and backoff helpers
/// - Small time helpers
///
/// IMPORTANT:
/// - No provider-specific or archive-specific logic should live here.
/// - Everything except the jitter helpers must remain deterministic.
///

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};

/// Read size used when hashing files.
///
/// Archives can be several hundred megabytes, so files are never
/// loaded into memory as a whole.
pub const FINGERPRINT_CHUNK_SIZE: usize = 1024 * 1024;

/// Computes the hex SHA-256 fingerprint of a file.
///
/// The file is streamed in `FINGERPRINT_CHUNK_SIZE` chunks, so memory
/// use is bounded regardless of file size.
///
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FINGERPRINT_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of an in-memory buffer.
#[cfg(test)]
pub(crate) fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Returns the current UTC time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// `end` minus `days` whole days, clamped to the earliest representable
/// instant instead of overflowing.
pub fn days_before(end: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    end.checked_sub_signed(TimeDelta::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Randomizes `base` by up to ±`fraction`.
///
/// Examples (fraction = 0.1):
/// - 60s -> anything in [54s, 66s]
///
/// A fraction of zero (or below) returns `base` unchanged.
///
pub fn jittered(base: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return base;
    }

    let factor = 1.0 + rand::random_range(-fraction..=fraction);
    base.mul_f64(factor.max(0.0))
}

/// Exponential backoff delay for a zero-based retry index, plus up to
/// `jitter` (as a fraction) of random extra delay.
///
/// Examples (base = 500ms, jitter = 0):
/// - retry 0 -> 500ms
/// - retry 1 -> 1s
/// - retry 2 -> 2s
///
pub fn backoff_delay(base: Duration, retry: u32, jitter: f64) -> Duration {
    let exponential = base.saturating_mul(1u32 << retry.min(16));

    if jitter <= 0.0 {
        return exponential;
    }

    exponential + exponential.mul_f64(rand::random_range(0.0..=jitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_and_bytes_fingerprints_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"example-data").unwrap();
        drop(file);

        let from_file = fingerprint_file(&path).unwrap();
        assert_eq!(from_file, fingerprint_bytes(b"example-data"));
        assert_eq!(from_file.len(), 64);
        assert_eq!(from_file, fingerprint_file(&path).unwrap());
    }

    #[test]
    fn fingerprint_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let data = vec![7u8; FINGERPRINT_CHUNK_SIZE * 2 + 17];
        std::fs::write(&path, &data).unwrap();

        assert_eq!(fingerprint_file(&path).unwrap(), fingerprint_bytes(&data));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let base = Duration::from_secs(100);
        for _ in 0..200 {
            let d = jittered(base, 0.1);
            assert!(d >= Duration::from_millis(89_999) && d <= Duration::from_millis(110_001));
        }
        assert_eq!(jittered(base, 0.0), base);
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0, 0.0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2, 0.0), Duration::from_secs(2));

        let jittered = backoff_delay(base, 1, 0.2);
        assert!(jittered >= Duration::from_secs(1));
        assert!(jittered <= Duration::from_millis(1200));
    }
}
