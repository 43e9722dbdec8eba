//! Storage device identity, used to choose between rename and copy-then-delete.

use std::path::Path;

use tracing::debug;

/// Decides whether two paths can be moved between with an atomic rename.
pub trait DevicePolicy {
    /// True only if both paths are known to live on the same device.
    fn same_device(&self, a: &Path, b: &Path) -> bool;
}

/// Compares the device identity reported by the filesystem.
///
/// A path that does not exist yet is resolved through its nearest existing
/// ancestor. When either identity is unknown the answer is `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDevicePolicy;

impl DevicePolicy for FsDevicePolicy {
    fn same_device(&self, a: &Path, b: &Path) -> bool {
        match (device_id(a), device_id(b)) {
            (Some(left), Some(right)) => left == right,
            _ => {
                debug!(
                    "device identity unknown for {} or {}, assuming different devices",
                    a.display(),
                    b.display()
                );
                false
            }
        }
    }
}

/// Always gives the same answer. Useful to force copy-then-delete moves.
#[derive(Debug, Clone, Copy)]
pub struct StaticDevicePolicy(pub bool);

impl DevicePolicy for StaticDevicePolicy {
    fn same_device(&self, _a: &Path, _b: &Path) -> bool {
        self.0
    }
}

/// Device identifier of `path`, or of its nearest existing ancestor.
///
/// Symbolic links are not followed for the path itself.
#[cfg(unix)]
pub fn device_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;

    let mut candidate = Some(path);
    while let Some(current) = candidate {
        let probe = if current.as_os_str().is_empty() {
            Path::new(".")
        } else {
            current
        };
        match std::fs::symlink_metadata(probe) {
            Ok(metadata) => return Some(metadata.dev()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                candidate = current.parent();
            }
            Err(_) => return None,
        }
    }
    None
}

/// Device identity is not available here; every move is treated as cross-device.
#[cfg(not(unix))]
pub fn device_id(_path: &Path) -> Option<u64> {
    None
}
