//! Caller-supplied decisions: destination conflicts and missing destination roots.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Why a destination cannot simply be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A file already exists at the destination
    FileExists,
    /// A non-empty directory already exists at the destination
    DirectoryNotEmpty,
    /// The destination exists with a different entry type
    TypeMismatch,
}

/// Answer to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Overwrite,
    Skip,
    /// Stop the whole request, as if the cancellation token had been tripped
    Cancel,
}

/// A conflict presented to the resolver.
#[derive(Debug, Clone, Copy)]
pub struct Conflict<'a> {
    pub kind: ConflictKind,
    pub source: &'a Path,
    pub destination: &'a Path,
}

/// Decides what to do when a destination is occupied.
///
/// Usually backed by a user prompt. Directory conflicts are never merged:
/// any answer other than `Cancel` skips the directory.
pub trait ConflictResolver {
    fn resolve(&self, conflict: &Conflict<'_>) -> Resolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Conflict<'_>) -> Resolution,
{
    fn resolve(&self, conflict: &Conflict<'_>) -> Resolution {
        self(conflict)
    }
}

/// Fixed, non-interactive conflict policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Don't overwrite; skip existing files
    Skip,
    /// Always overwrite existing files
    Overwrite,
    /// Overwrite if source is newer OR size differs
    SmartUpdate,
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverwritePolicy::Skip => write!(f, "Skip"),
            OverwritePolicy::Overwrite => write!(f, "Overwrite"),
            OverwritePolicy::SmartUpdate => write!(f, "SmartUpdate"),
        }
    }
}

impl FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(OverwritePolicy::Skip),
            "overwrite" => Ok(OverwritePolicy::Overwrite),
            "smart" | "smart-update" => Ok(OverwritePolicy::SmartUpdate),
            _ => Err(format!(
                "invalid overwrite policy '{}', expected skip, overwrite or smart",
                s
            )),
        }
    }
}

impl ConflictResolver for OverwritePolicy {
    fn resolve(&self, conflict: &Conflict<'_>) -> Resolution {
        if conflict.kind != ConflictKind::FileExists {
            return Resolution::Skip;
        }
        match self {
            OverwritePolicy::Skip => Resolution::Skip,
            OverwritePolicy::Overwrite => Resolution::Overwrite,
            OverwritePolicy::SmartUpdate => {
                if source_is_newer_or_resized(conflict.source, conflict.destination) {
                    Resolution::Overwrite
                } else {
                    Resolution::Skip
                }
            }
        }
    }
}

fn source_is_newer_or_resized(source: &Path, destination: &Path) -> bool {
    let (Ok(src), Ok(dst)) = (fs::metadata(source), fs::metadata(destination)) else {
        // Metadata read error: attempt copy
        return true;
    };
    if src.len() != dst.len() {
        return true;
    }
    match (src.modified(), dst.modified()) {
        (Ok(src_mtime), Ok(dst_mtime)) => src_mtime > dst_mtime,
        _ => false,
    }
}

/// Asked whether a missing destination root may be created.
pub trait DestinationPrompt {
    fn confirm_create(&self, destination: &Path) -> bool;
}

impl<F> DestinationPrompt for F
where
    F: Fn(&Path) -> bool,
{
    fn confirm_create(&self, destination: &Path) -> bool {
        self(destination)
    }
}

/// Creates missing destinations without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCreate;

impl DestinationPrompt for AlwaysCreate {
    fn confirm_create(&self, _destination: &Path) -> bool {
        true
    }
}
