//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which allows decoupling
//! the transfer engine from any specific UI technology (CLI, GUI, etc.).

use std::path::Path;

use crate::model::{EntryAction, FileState, TransferJob, TransferOutcome};

/// One finished entry, as reported to `on_file_completed`.
#[derive(Debug, Clone, Copy)]
pub struct EntryEvent<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub is_dir: bool,
    pub state: FileState,
    /// How the entry was transferred, when `state` is `Done`
    pub action: Option<EntryAction>,
    /// Bytes moved for this entry
    pub bytes: u64,
}

/// Trait for receiving progress updates from a transfer job.
///
/// All methods are called synchronously on the thread running the job.
/// Every method except `on_progress` has an empty default.
pub trait ProgressCallback: Send {
    /// Called once the job leaves validation and knows its totals.
    fn on_job_started(&self, _job: &TransferJob) {}

    /// Called when an entry is about to be processed.
    fn on_file_started(&self, _job: &TransferJob, _source: &Path) {}

    /// Work done so far out of the known total.
    ///
    /// Copies report bytes after every file. Rename-only moves report
    /// entries, every `EngineOptions::rename_progress_every` renames.
    fn on_progress(&self, done: u64, total: u64, current: &Path);

    /// Called when an entry is done (transferred, skipped, or failed).
    fn on_file_completed(&self, _job: &TransferJob, _event: &EntryEvent<'_>) {}

    /// A point where the host may pump its event loop or flip the
    /// cancellation token. Reached after every file and periodically during
    /// the pre-scan.
    fn on_yield(&self) {}

    /// Called exactly once with the terminal outcome.
    fn on_job_completed(&self, _job: &TransferJob, _outcome: &TransferOutcome) {}
}
