//! # PaneCopy Engine - File Transfer Library
//!
//! A headless copy/move engine for a dual-panel file manager.
//! Designed as the foundation for multiple front ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine copies and moves files and directory trees between panels.
//! It features:
//! - Iterative directory traversal with cycle detection
//! - Pre-scan statistics, optionally on a worker thread
//! - Part-file staging with timestamp propagation and durability flush
//! - Atomic renames on the same device, copy-then-delete across devices
//! - Caller-decided conflicts, cooperative cancellation and progress callbacks
//! - Content digests (CRC32, MD5, SHA-256, BLAKE3) for verify-after-copy
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{transfer, CancellationToken, Collaborators, EngineOptions, Mode};
//! use engine::{OverwritePolicy, TransferRequest};
//!
//! let request = TransferRequest::new(["/home/me/photos"], "/mnt/backup", Mode::Copy);
//! let policy = OverwritePolicy::Skip;
//! let report = transfer(
//!     request,
//!     EngineOptions::default(),
//!     &Collaborators::new(&policy),
//!     &CancellationToken::new(),
//! );
//!
//! println!("{:?}", report.outcome);
//! for warning in &report.warnings {
//!     println!("{}: {}", warning.path.display(), warning.error);
//! }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (TransferRequest, TransferJob, outcomes)
//! - **error**: Error types and taxonomy
//! - **walker**: Depth-first directory traversal
//! - **stats**: Pre-scan totals
//! - **job**: Job orchestration (create, plan, run)
//! - **fs_ops**: Low-level filesystem operations
//! - **checksums**: Content digests and verification
//! - **conflict**, **progress**, **device**: Caller collaborators

pub mod cancel;
pub mod checksums;
pub mod conflict;
pub mod device;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod progress;
pub mod stats;
pub mod temp_path;
pub mod walker;

// Re-export main types and functions
pub use cancel::CancellationToken;
pub use checksums::{hash_file, hash_file_named, verify_copy, ChecksumAlgorithm, ChecksumValue, DigestRequest};
pub use conflict::{Conflict, ConflictKind, ConflictResolver, DestinationPrompt, OverwritePolicy, Resolution};
pub use device::{DevicePolicy, FsDevicePolicy, StaticDevicePolicy};
pub use error::{EngineError, ErrorKind};
pub use job::{create_job, plan_job, run_job, transfer, Collaborators};
pub use model::{
    EngineOptions, EntryAction, EntryWarning, FileState, JobState, Mode, TransferCounts,
    TransferJob, TransferOutcome, TransferReport, TransferRequest, TransferStatistics,
};
pub use progress::{EntryEvent, ProgressCallback};
pub use stats::{collect_statistics, spawn_statistics_scan, ScanHandle, ScanSettings};
pub use temp_path::{cleanup_part_files, SequenceCounter, TempPathGenerator, PART_SUFFIX};
pub use walker::{DirectoryWalker, EntryFilter, WalkEntry, WalkOptions};
