//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Copying files through a staged part file with metadata preservation
//! - Finalizing written files (timestamps, permissions, durability flush)
//! - Creating, renaming and removing entries

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::temp_path::TempPathGenerator;

#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = libc::EXDEV;
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE

/// True if a rename failed only because it crossed a device boundary.
pub fn is_cross_device_error(error: &io::Error) -> bool {
    #[cfg(any(unix, windows))]
    {
        error.raw_os_error() == Some(CROSS_DEVICE_ERROR)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = error;
        false
    }
}

/// Copy a file to `dst` via a part file in the same directory.
///
/// The part file is finalized (permissions, timestamps, `sync_all`) before
/// it is renamed onto `dst`, so `dst` never holds a partial copy. On any
/// failure the part file is removed.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_staged(
    src: &Path,
    dst: &Path,
    temp_paths: &TempPathGenerator,
    buffer_size: usize,
    preserve_permissions: bool,
) -> Result<u64, EngineError> {
    if buffer_size == 0 {
        return Err(EngineError::ZeroBufferSize);
    }

    let mut src_file = File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let part = temp_paths.generate(dst, false);
    let mut part_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&part)
        .map_err(|e| EngineError::WriteError {
            path: part.clone(),
            source: e,
        })?;

    let staged = copy_contents(&mut src_file, &mut part_file, src, &part, buffer_size)
        .and_then(|bytes| {
            finalize_file(&part_file, &part, &src_metadata, preserve_permissions)?;
            Ok(bytes)
        });
    drop(part_file);

    let bytes = match staged {
        Ok(bytes) => bytes,
        Err(e) => {
            discard_part(&part);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&part, dst) {
        discard_part(&part);
        return Err(EngineError::RenameFailed {
            from: part,
            path: dst.to_path_buf(),
            source: e,
        });
    }

    debug!("copied {} -> {} ({} bytes)", src.display(), dst.display(), bytes);
    Ok(bytes)
}

fn copy_contents(
    src_file: &mut File,
    dst_file: &mut File,
    src: &Path,
    dst: &Path,
    buffer_size: usize,
) -> Result<u64, EngineError> {
    let mut buffer = vec![0u8; buffer_size];
    let mut total: u64 = 0;
    loop {
        let n = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: src.to_path_buf(),
                    source: e,
                })
            }
        };
        dst_file
            .write_all(&buffer[..n])
            .map_err(|e| EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            })?;
        total += n as u64;
    }
    Ok(total)
}

/// Propagate source metadata onto a written file, then flush it to disk.
///
/// Timestamps are applied before `sync_all` so the flushed state already
/// carries them.
pub fn finalize_file(
    file: &File,
    path: &Path,
    src_metadata: &Metadata,
    preserve_permissions: bool,
) -> Result<(), EngineError> {
    let finalize_error = |e: io::Error| EngineError::FinalizeFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if preserve_permissions {
        file.set_permissions(src_metadata.permissions())
            .map_err(finalize_error)?;
    }

    let atime = FileTime::from_last_access_time(src_metadata);
    let mtime = FileTime::from_last_modification_time(src_metadata);
    filetime::set_file_handle_times(file, Some(atime), Some(mtime)).map_err(finalize_error)?;

    file.sync_all().map_err(finalize_error)
}

fn discard_part(part: &Path) {
    if let Err(e) = fs::remove_file(part) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("cannot remove part file {}: {}", part.display(), e);
        }
    }
}

/// Recreate the symbolic link `src` at `dst`.
#[cfg(unix)]
pub fn copy_symlink(src: &Path, dst: &Path) -> Result<(), EngineError> {
    let target = fs::read_link(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    std::os::unix::fs::symlink(&target, dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })
}

#[cfg(not(unix))]
pub fn copy_symlink(src: &Path, dst: &Path) -> Result<(), EngineError> {
    let _ = src;
    Err(EngineError::WriteError {
        path: dst.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Unsupported, "symbolic links are not copied here"),
    })
}

/// Create a directory and any missing parents. Succeeds if it already exists.
pub fn create_dir(path: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(path).map_err(|e| EngineError::DirectoryCreationFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// True if `path` is a directory with no entries.
pub fn dir_is_empty(path: &Path) -> Result<bool, EngineError> {
    let mut entries = fs::read_dir(path).map_err(|e| EngineError::EnumerationFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(entries.next().is_none())
}

/// Rename `from` to `to`.
pub fn rename_entry(from: &Path, to: &Path) -> Result<(), io::Error> {
    fs::rename(from, to)
}

/// Remove a file or symbolic link. Directories are refused.
pub fn remove_file_entry(path: &Path) -> Result<(), EngineError> {
    fs::remove_file(path).map_err(|e| EngineError::RemoveFailed {
        path: path.to_path_buf(),
        source: e,
    })
}
