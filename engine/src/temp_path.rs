//! Part-file naming.
//!
//! Copies are staged under a sibling name and renamed onto the final path
//! once finalized. A staging name is
//!
//! ```text
//! <crc32 of absolute target, 8 hex><pid><mmssSSSuuu><sequence, 4 digits>.part
//! ```
//!
//! The `.part` suffix and that layout are what [`cleanup_part_files`] relies
//! on to recognise orphans, so both must stay stable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Timelike;
use tracing::{debug, warn};

use crate::checksums::crc32;
use crate::error::EngineError;

/// Suffix marking a transient staging artifact.
pub const PART_SUFFIX: &str = ".part";

const SEQUENCE_MODULUS: u32 = 10_000;
const TIME_DIGITS: usize = 10;
const SEQUENCE_DIGITS: usize = 4;

/// Shared sequence used to tell apart names generated in the same microsecond.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(value: u32) -> Self {
        SequenceCounter {
            next: AtomicU32::new(value),
        }
    }

    /// The counter shared by every generator built with `TempPathGenerator::new`.
    pub fn process_wide() -> Arc<SequenceCounter> {
        static COUNTER: OnceLock<Arc<SequenceCounter>> = OnceLock::new();
        Arc::clone(COUNTER.get_or_init(|| Arc::new(SequenceCounter::new())))
    }

    /// Next value, modulo 10,000.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed) % SEQUENCE_MODULUS
    }
}

/// Produces unique sibling paths for writes in progress.
#[derive(Debug, Clone)]
pub struct TempPathGenerator {
    counter: Arc<SequenceCounter>,
}

impl Default for TempPathGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TempPathGenerator {
    pub fn new() -> Self {
        Self::with_counter(SequenceCounter::process_wide())
    }

    pub fn with_counter(counter: Arc<SequenceCounter>) -> Self {
        TempPathGenerator { counter }
    }

    /// Staging path for `target`.
    ///
    /// For a file target the result sits next to it; for a directory target
    /// (`is_dir`) it sits inside that directory.
    pub fn generate(&self, target: &Path, is_dir: bool) -> PathBuf {
        let dir = if is_dir {
            target
        } else {
            target.parent().unwrap_or_else(|| Path::new(""))
        };

        let absolute = absolute(target);
        let checksum = crc32(absolute.to_string_lossy().as_bytes());

        let now = chrono::Local::now();
        let micros = (now.nanosecond() / 1_000) % 1_000_000;
        let name = format!(
            "{:08x}{}{:02}{:02}{:03}{:03}{:04}{}",
            checksum,
            std::process::id(),
            now.minute(),
            now.second(),
            micros / 1_000,
            micros % 1_000,
            self.counter.next(),
            PART_SUFFIX
        );
        dir.join(name)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// True if `name` has the layout produced by [`TempPathGenerator::generate`].
pub fn is_part_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(PART_SUFFIX) else {
        return false;
    };
    if stem.len() < 8 + 1 + TIME_DIGITS + SEQUENCE_DIGITS || !stem.is_ascii() {
        return false;
    }
    let (checksum, rest) = stem.split_at(8);
    checksum.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        && rest.chars().all(|c| c.is_ascii_digit())
}

/// Remove orphaned part files directly inside `dir`.
///
/// Returns how many were removed. Files that cannot be removed are logged
/// and left in place.
pub fn cleanup_part_files(dir: &Path) -> Result<usize, EngineError> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_part_file_name(name) || !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("removed orphaned part file {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("cannot remove part file {}: {}", entry.path().display(), e),
        }
    }
    Ok(removed)
}
