//! Depth-first directory traversal.
//!
//! `DirectoryWalker` visits a subtree in pre-order (a directory is yielded
//! before its children) using an explicit stack of open directory levels
//! instead of recursion. Callers drive it one entry at a time, which gives
//! them a natural place to poll a cancellation token between entries.
//!
//! The root itself is never yielded; only its descendants are.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Traversal switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Descend into symbolic links that point at directories
    pub follow_symlinks: bool,
    /// Refuse to re-enter a directory that is already open on the stack
    pub detect_cycles: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            follow_symlinks: false,
            detect_cycles: true,
        }
    }
}

/// Which entries are yielded.
///
/// `files` and `dirs` only decide what is returned to the caller; directories
/// are descended whether or not they are yielded. Hidden entries excluded by
/// `hidden = false` are neither yielded nor descended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFilter {
    pub files: bool,
    pub dirs: bool,
    pub hidden: bool,
}

impl Default for EntryFilter {
    fn default() -> Self {
        EntryFilter {
            files: true,
            dirs: true,
            hidden: true,
        }
    }
}

impl EntryFilter {
    fn accepts(&self, entry: &WalkEntry) -> bool {
        if entry.is_dir() {
            self.dirs
        } else {
            self.files
        }
    }
}

/// A single filesystem entry produced by the walker.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    path: PathBuf,
    metadata: Metadata,
    target_is_dir: bool,
    depth: usize,
}

impl WalkEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_else(|| self.path.as_os_str())
    }

    /// Metadata of the entry itself (symbolic links are not traversed).
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_symlink(&self) -> bool {
        self.metadata.file_type().is_symlink()
    }

    /// True for directories and for symbolic links that resolve to one.
    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir() || (self.is_symlink() && self.target_is_dir)
    }

    /// Size in bytes for regular files, 0 for everything else.
    pub fn size(&self) -> u64 {
        if self.metadata.is_file() {
            self.metadata.len()
        } else {
            0
        }
    }

    /// Distance from the walk root; children of the root have depth 1.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Total order used to sort the entries of each directory.
pub type EntryOrder = Box<dyn Fn(&WalkEntry, &WalkEntry) -> Ordering + Send>;

/// Directories first, then case-sensitive name order.
///
/// Names are compared by Unicode code point after lossy UTF-8 conversion,
/// not by locale collation. Callers that need locale-aware ordering pass
/// their own comparator to `DirectoryWalker::with_order`.
pub fn default_order(a: &WalkEntry, b: &WalkEntry) -> Ordering {
    match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.file_name().to_string_lossy().cmp(&b.file_name().to_string_lossy()),
    }
}

/// One open directory level.
struct WalkFrame {
    dir: PathBuf,
    canonical: Option<PathBuf>,
    // Sorted, stored back to front: the cursor is the tail of the vector.
    entries: Vec<WalkEntry>,
}

impl WalkFrame {
    fn is_exhausted(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lazy pre-order traversal of a directory subtree.
pub struct DirectoryWalker {
    root: PathBuf,
    options: WalkOptions,
    filter: EntryFilter,
    order: EntryOrder,
    frames: Vec<WalkFrame>,
    visited: HashSet<PathBuf>,
    peeked: Option<WalkEntry>,
    last_yielded: Option<PathBuf>,
    started: bool,
}

impl DirectoryWalker {
    pub fn new(root: impl Into<PathBuf>, options: WalkOptions) -> Self {
        DirectoryWalker {
            root: root.into(),
            options,
            filter: EntryFilter::default(),
            order: Box::new(default_order),
            frames: Vec::new(),
            visited: HashSet::new(),
            peeked: None,
            last_yielded: None,
            started: false,
        }
    }

    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replace the default ordering. Sorting is stable.
    pub fn with_order<F>(mut self, order: F) -> Self
    where
        F: Fn(&WalkEntry, &WalkEntry) -> Ordering + Send + 'static,
    {
        self.order = Box::new(order);
        self
    }

    /// True if another entry will be yielded.
    ///
    /// Reads ahead: the next entry is fetched and cached for `next()`, which
    /// may open directories and push frames.
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
        self.peeked.is_some()
    }

    /// Do not descend into the directory most recently returned by `next()`.
    ///
    /// Has no effect if that entry was not a directory.
    pub fn skip_subtree(&mut self) {
        let Some(last) = self.last_yielded.take() else {
            return;
        };
        while self
            .frames
            .last()
            .is_some_and(|frame| frame.dir.starts_with(&last))
        {
            self.pop_frame();
        }
        if self
            .peeked
            .as_ref()
            .is_some_and(|entry| entry.path.starts_with(&last))
        {
            self.peeked = None;
        }
    }

    /// Start over from the root.
    pub fn rewind(&mut self) {
        self.frames.clear();
        self.visited.clear();
        self.peeked = None;
        self.last_yielded = None;
        self.started = false;
    }

    /// Number of directory levels currently open.
    pub fn open_frames(&self) -> usize {
        self.frames.len()
    }

    fn advance(&mut self) -> Option<WalkEntry> {
        if !self.started {
            self.started = true;
            let root = self.root.clone();
            self.push_frame(&root, 0);
        }

        loop {
            let frame = self.frames.last_mut()?;
            if frame.is_exhausted() {
                self.pop_frame();
                continue;
            }
            let Some(entry) = frame.entries.pop() else {
                continue;
            };

            if entry.is_dir() && (!entry.is_symlink() || self.options.follow_symlinks) {
                self.push_frame(&entry.path, entry.depth);
            }

            if self.filter.accepts(&entry) {
                return Some(entry);
            }
        }
    }

    fn push_frame(&mut self, dir: &Path, depth: usize) {
        let canonical = if self.options.detect_cycles {
            match fs::canonicalize(dir) {
                Ok(canonical) => {
                    if self.visited.contains(&canonical) {
                        debug!("cycle detected, not descending into {}", dir.display());
                        return;
                    }
                    self.visited.insert(canonical.clone());
                    Some(canonical)
                }
                Err(e) => {
                    warn!("cannot resolve {}: {}", dir.display(), e);
                    return;
                }
            }
        } else {
            None
        };

        let mut entries = read_sorted(dir, depth + 1, &self.filter, &self.order);
        entries.reverse();
        self.frames.push(WalkFrame {
            dir: dir.to_path_buf(),
            canonical,
            entries,
        });
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            if let Some(canonical) = frame.canonical {
                self.visited.remove(&canonical);
            }
        }
    }
}

impl Iterator for DirectoryWalker {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        let entry = match self.peeked.take() {
            Some(entry) => Some(entry),
            None => self.advance(),
        };
        self.last_yielded = entry.as_ref().map(|e| e.path.clone());
        entry
    }
}

/// List one directory. An unreadable directory yields no entries.
fn read_sorted(dir: &Path, depth: usize, filter: &EntryFilter, order: &EntryOrder) -> Vec<WalkEntry> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) => {
            warn!("skipping unreadable directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(e) => {
                debug!("skipping entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !filter.hidden && is_hidden(&dir_entry.file_name()) {
            continue;
        }
        let metadata = match dir_entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("skipping {}: {}", dir_entry.path().display(), e);
                continue;
            }
        };
        let path = dir_entry.path();
        let target_is_dir = metadata.file_type().is_symlink()
            && fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false);
        entries.push(WalkEntry {
            path,
            metadata,
            target_is_dir,
            depth,
        });
    }
    entries.sort_by(|a, b| order(a, b));
    entries
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
