//! Error types for the transfer engine.
//!
//! `EngineError` covers both job-level failures (validation, an unusable
//! destination root) and the per-entry failures that are recorded as
//! warnings in a `TransferReport`. `ErrorKind` sorts every variant into the
//! taxonomy callers branch on.

use std::io;
use std::path::{Path, PathBuf};

/// Broad classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request rejected before any filesystem mutation
    Validation,
    /// Destination already occupied; recoverable through the conflict resolver
    Conflict,
    /// Filesystem failure (permissions, missing parent, disk full, ...)
    Io,
    /// Caller misuse: zero buffer size, unknown digest name, bad key usage
    Programming,
    /// The operation observed a tripped cancellation token
    Cancelled,
}

/// Errors produced by the engine.
///
/// Variants that wrap an `io::Error` keep it as the error source, so the
/// full chain is available to callers that walk `Error::source()`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Source path does not exist
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source and destination resolve to the same canonical path
    #[error("source and destination are the same: {}", path.display())]
    SameSourceAndDestination { path: PathBuf },

    /// Destination lies inside a source directory
    #[error("cannot transfer {} into its own subdirectory {}", source_dir.display(), destination.display())]
    DestinationInsideSource {
        source_dir: PathBuf,
        destination: PathBuf,
    },

    /// Destination root exists but is not a directory
    #[error("destination is not a directory: {}", path.display())]
    DestinationNotDirectory { path: PathBuf },

    /// Request named no sources
    #[error("transfer request has no sources")]
    NoSources,

    /// Destination file already exists and the resolver chose not to replace it
    #[error("destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    /// Destination directory already holds entries; merging is refused
    #[error("destination directory is not empty, refusing to merge: {}", path.display())]
    DirectoryNotEmpty { path: PathBuf },

    /// Destination exists with a different entry type than the source
    #[error("destination has a different type than the source: {}", path.display())]
    TypeMismatch { path: PathBuf },

    /// Failed to read from a source file
    #[error("failed to read {}", path.display())]
    ReadError { path: PathBuf, source: io::Error },

    /// Failed to write to a destination file
    #[error("failed to write {}", path.display())]
    WriteError { path: PathBuf, source: io::Error },

    /// Failed to enumerate a directory
    #[error("failed to enumerate directory {}", path.display())]
    EnumerationFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory
    #[error("failed to create directory {}", path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },

    /// Rename (atomic move or part-file promotion) failed
    #[error("failed to rename {} to {}", from.display(), path.display())]
    RenameFailed {
        from: PathBuf,
        path: PathBuf,
        source: io::Error,
    },

    /// Removing an entry failed
    #[error("failed to remove {}", path.display())]
    RemoveFailed { path: PathBuf, source: io::Error },

    /// Timestamp propagation or durability flush failed
    #[error("failed to finalize {}", path.display())]
    FinalizeFailed { path: PathBuf, source: io::Error },

    /// Copied content does not match the source digest
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Hashing buffer of zero bytes
    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,

    /// Digest algorithm name not recognised
    #[error("unsupported digest algorithm: {name}")]
    UnsupportedAlgorithm { name: String },

    /// A key was supplied for an algorithm that has no keyed mode
    #[error("digest algorithm {algorithm} does not support a key")]
    KeyNotSupported { algorithm: String },

    /// Cancellation token observed
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotFound { .. }
            | Self::SameSourceAndDestination { .. }
            | Self::DestinationInsideSource { .. }
            | Self::DestinationNotDirectory { .. }
            | Self::NoSources => ErrorKind::Validation,
            Self::DestinationExists { .. }
            | Self::DirectoryNotEmpty { .. }
            | Self::TypeMismatch { .. } => ErrorKind::Conflict,
            Self::ReadError { .. }
            | Self::WriteError { .. }
            | Self::EnumerationFailed { .. }
            | Self::DirectoryCreationFailed { .. }
            | Self::RenameFailed { .. }
            | Self::RemoveFailed { .. }
            | Self::FinalizeFailed { .. }
            | Self::ChecksumMismatch { .. } => ErrorKind::Io,
            Self::ZeroBufferSize
            | Self::UnsupportedAlgorithm { .. }
            | Self::KeyNotSupported { .. } => ErrorKind::Programming,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Path the error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::SourceNotFound { path }
            | Self::SameSourceAndDestination { path }
            | Self::DestinationNotDirectory { path }
            | Self::DestinationExists { path }
            | Self::DirectoryNotEmpty { path }
            | Self::TypeMismatch { path }
            | Self::ReadError { path, .. }
            | Self::WriteError { path, .. }
            | Self::EnumerationFailed { path, .. }
            | Self::DirectoryCreationFailed { path, .. }
            | Self::RenameFailed { path, .. }
            | Self::RemoveFailed { path, .. }
            | Self::FinalizeFailed { path, .. }
            | Self::ChecksumMismatch { path, .. } => Some(path),
            Self::DestinationInsideSource { destination, .. } => Some(destination),
            Self::NoSources
            | Self::ZeroBufferSize
            | Self::UnsupportedAlgorithm { .. }
            | Self::KeyNotSupported { .. }
            | Self::Cancelled => None,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::RenameFailed { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::FinalizeFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
