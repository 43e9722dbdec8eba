//! Core data model for transfer jobs.
//!
//! This module defines the main data structures for representing transfer operations:
//! - TransferRequest: what the caller asks for
//! - TransferJob: the validated, running operation
//! - TransferStatistics: pre-scan totals used to bound progress
//! - TransferOutcome / TransferReport: the terminal result and its diagnostics
//! - EngineOptions: tunables

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::temp_path::TempPathGenerator;

/// The operation mode for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Copy entries; sources remain unchanged
    Copy,
    /// Move entries; sources are removed once their destination is in place
    Move,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Copy => write!(f, "Copy"),
            Mode::Move => write!(f, "Move"),
        }
    }
}

/// A caller's request: these sources go into this destination directory.
///
/// Each source lands at `destination/<source file name>`.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub mode: Mode,
}

impl TransferRequest {
    pub fn new<I, P>(sources: I, destination: impl Into<PathBuf>, mode: Mode) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        TransferRequest {
            sources: sources.into_iter().map(Into::into).collect(),
            destination: destination.into(),
            mode,
        }
    }
}

/// Totals of a source tree, computed before the transfer starts.
///
/// `total_dirs` counts directory sources themselves; `total_bytes` is the sum
/// of regular file sizes only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatistics {
    pub total_files: u64,
    pub total_dirs: u64,
    pub total_bytes: u64,
}

impl TransferStatistics {
    /// Files plus directories.
    pub fn total_entries(&self) -> u64 {
        self.total_files + self.total_dirs
    }

    pub fn merge(&mut self, other: &TransferStatistics) {
        self.total_files += other.total_files;
        self.total_dirs += other.total_dirs;
        self.total_bytes += other.total_bytes;
    }
}

/// The state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Request checked, nothing touched yet
    Validating,
    /// Counting directory sources
    PreScanning,
    /// Entries are being copied, renamed or created
    Transferring,
    /// Removing emptied source directories after a move
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }
}

/// What happened to an individual entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    /// Copied, renamed or created
    Done,
    /// Left alone after a conflict
    Skipped,
    /// Error occurred; recorded as a warning
    Failed,
}

/// How a finished entry reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryAction {
    /// Content written through a part file
    Copied,
    /// Atomic rename on the same device
    Renamed,
    /// Directory created at the destination
    CreatedDir,
    /// Symbolic link recreated at the destination
    Linked,
}

/// A per-entry failure or conflict, surfaced alongside the outcome.
#[derive(Debug)]
pub struct EntryWarning {
    pub path: PathBuf,
    pub error: EngineError,
}

/// Per-entry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounts {
    pub files_copied: u64,
    pub files_renamed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub dirs_created: u64,
}

/// Terminal result of one request. Produced exactly once.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed { bytes_transferred: u64 },
    Cancelled { bytes_transferred: u64 },
    Failed { reason: EngineError, path: PathBuf },
}

impl TransferOutcome {
    pub(crate) fn failed(reason: EngineError) -> Self {
        let path = reason.path().map(PathBuf::from).unwrap_or_default();
        TransferOutcome::Failed { reason, path }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferOutcome::Cancelled { .. })
    }

    pub fn bytes_transferred(&self) -> u64 {
        match self {
            TransferOutcome::Completed { bytes_transferred }
            | TransferOutcome::Cancelled { bytes_transferred } => *bytes_transferred,
            TransferOutcome::Failed { .. } => 0,
        }
    }
}

/// Outcome plus everything needed to diagnose a partial transfer.
#[derive(Debug)]
pub struct TransferReport {
    pub job_id: Uuid,
    pub outcome: TransferOutcome,
    pub warnings: Vec<EntryWarning>,
    pub counts: TransferCounts,
    pub statistics: TransferStatistics,
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Copy buffer in bytes; must be non-zero
    pub buffer_size: usize,
    /// Pre-scan entries between yield points
    pub yield_every: u64,
    /// Rename-only moves report progress every N entries
    pub rename_progress_every: u64,
    /// Retry a failed same-device rename as copy-then-delete
    pub copy_fallback_on_rename_failure: bool,
    /// Re-hash source and destination after each copy
    pub verify: Option<ChecksumAlgorithm>,
    pub follow_symlinks: bool,
    pub include_hidden: bool,
    pub preserve_permissions: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            buffer_size: 64 * 1024,
            yield_every: 256,
            rename_progress_every: 64,
            copy_fallback_on_rename_failure: false,
            verify: None,
            follow_symlinks: false,
            include_hidden: true,
            preserve_permissions: true,
        }
    }
}

/// A validated transfer, carried through planning and execution.
#[derive(Debug)]
pub struct TransferJob {
    /// Unique identifier for this job
    pub id: Uuid,

    pub mode: Mode,

    /// Source entries, in request order
    pub sources: Vec<PathBuf>,

    /// Destination directory
    pub destination_path: PathBuf,

    pub options: EngineOptions,

    pub state: JobState,

    /// Totals from the pre-scan (zero until planned)
    pub statistics: TransferStatistics,

    /// Pre-scan totals per source, parallel to `sources`
    pub source_totals: Vec<TransferStatistics>,

    /// Whether `plan_job` has run
    pub planned: bool,

    /// Bytes copied or renamed so far
    pub bytes_transferred: u64,

    /// Entries processed so far (files and directories)
    pub entries_done: u64,

    pub counts: TransferCounts,

    /// Per-entry failures and conflicts
    pub warnings: Vec<EntryWarning>,

    /// Part-file name source
    pub temp_paths: TempPathGenerator,

    /// When job was created
    pub created_at: SystemTime,

    /// When job execution started
    pub start_time: Option<SystemTime>,

    /// When job execution completed
    pub end_time: Option<SystemTime>,
}
