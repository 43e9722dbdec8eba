//! Pre-scan of a source tree.
//!
//! The totals gate progress ranges, so a scan is all-or-nothing: a tripped
//! cancellation token yields `EngineError::Cancelled`, never a partial count.
//! Counters are published through atomics, which lets a scan run on a worker
//! thread while the controlling thread polls them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::model::TransferStatistics;
use crate::walker::{DirectoryWalker, EntryFilter, WalkOptions};

/// Scan tunables.
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    /// Entries between calls to the yield hook
    pub yield_every: u64,
    pub include_hidden: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            yield_every: 256,
            include_hidden: true,
        }
    }
}

/// Monotonic counters filled in while a scan runs.
#[derive(Debug, Default)]
pub struct StatisticsCounters {
    files: AtomicU64,
    dirs: AtomicU64,
    bytes: AtomicU64,
    finished: AtomicBool,
}

impl StatisticsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current totals. Final once `is_finished()` returns true.
    pub fn snapshot(&self) -> TransferStatistics {
        TransferStatistics {
            total_files: self.files.load(Ordering::Relaxed),
            total_dirs: self.dirs.load(Ordering::Relaxed),
            total_bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// True once the scan ended, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn add_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    fn add_file(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Count files, directories (including `root`) and bytes under `root`.
pub fn collect_statistics(
    root: &Path,
    token: &CancellationToken,
    settings: ScanSettings,
    on_yield: &mut dyn FnMut(),
) -> Result<TransferStatistics, EngineError> {
    let counters = StatisticsCounters::new();
    collect_statistics_into(root, &counters, token, settings, on_yield)
}

/// Like [`collect_statistics`], publishing into caller-owned counters.
///
/// `counters` is marked finished on every exit path.
pub fn collect_statistics_into(
    root: &Path,
    counters: &StatisticsCounters,
    token: &CancellationToken,
    settings: ScanSettings,
    on_yield: &mut dyn FnMut(),
) -> Result<TransferStatistics, EngineError> {
    let result = scan(root, counters, token, settings, on_yield);
    counters.finish();
    result
}

fn scan(
    root: &Path,
    counters: &StatisticsCounters,
    token: &CancellationToken,
    settings: ScanSettings,
    on_yield: &mut dyn FnMut(),
) -> Result<TransferStatistics, EngineError> {
    let metadata = std::fs::metadata(root).map_err(|e| EngineError::EnumerationFailed {
        path: root.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_dir() {
        return Err(EngineError::EnumerationFailed {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }

    let options = WalkOptions {
        follow_symlinks: false,
        detect_cycles: true,
    };
    let filter = EntryFilter {
        hidden: settings.include_hidden,
        ..EntryFilter::default()
    };
    let mut walker = DirectoryWalker::new(root, options).with_filter(filter);

    counters.add_dir();
    let mut seen: u64 = 0;
    loop {
        if token.is_cancelled() {
            debug!("statistics scan of {} cancelled", root.display());
            return Err(EngineError::Cancelled);
        }
        let Some(entry) = walker.next() else {
            break;
        };
        if entry.is_dir() && !entry.is_symlink() {
            counters.add_dir();
        } else {
            counters.add_file(entry.size());
        }
        seen += 1;
        if settings.yield_every > 0 && seen % settings.yield_every == 0 {
            on_yield();
        }
    }

    let totals = counters.snapshot();
    debug!(
        "scanned {}: {} files, {} dirs, {} bytes",
        root.display(),
        totals.total_files,
        totals.total_dirs,
        totals.total_bytes
    );
    Ok(totals)
}

/// A statistics scan running on its own thread.
pub struct ScanHandle {
    counters: Arc<StatisticsCounters>,
    handle: JoinHandle<Result<TransferStatistics, EngineError>>,
}

impl ScanHandle {
    /// Totals published so far.
    pub fn progress(&self) -> TransferStatistics {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.counters.is_finished()
    }

    /// Wait for the scan to end.
    pub fn join(self) -> Result<TransferStatistics, EngineError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Run [`collect_statistics_into`] on a worker thread.
pub fn spawn_statistics_scan(
    root: PathBuf,
    token: CancellationToken,
    settings: ScanSettings,
) -> ScanHandle {
    let counters = Arc::new(StatisticsCounters::new());
    let published = Arc::clone(&counters);
    let handle = thread::spawn(move || {
        collect_statistics_into(&root, &published, &token, settings, &mut || thread::yield_now())
    });
    ScanHandle { counters, handle }
}
