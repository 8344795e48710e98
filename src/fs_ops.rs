//! Filesystem mutations used by the reconciler

use crate::error::{SyncError, SyncResult};
use std::io::ErrorKind;
use std::path::Path;

/// Create a single directory; the parent must already exist
pub fn create_directory(path: &Path) -> SyncResult<()> {
    std::fs::create_dir(path).map_err(|e| SyncError::local_io("create directory", path, e))
}

/// Create a directory and any missing parents
pub fn ensure_dir_exists(path: &Path) -> SyncResult<()> {
    std::fs::create_dir_all(path).map_err(|e| SyncError::local_io("create directory", path, e))
}

/// Remove whatever occupies `path`. Directories are removed with their whole
/// contents; symlinks are removed, never followed. A path that is already gone
/// counts as removed.
pub fn remove_recursive(path: &Path) -> SyncResult<()> {
    let md = match std::fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SyncError::local_io("remove", path, e)),
    };
    let res = if md.file_type().is_dir() {
        #[cfg(windows)]
        clear_readonly_recursive(path);
        std::fs::remove_dir_all(path)
    } else {
        #[cfg(windows)]
        clear_readonly(path);
        remove_non_directory(path)
    };
    match res {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::local_io("remove", path, e)),
    }
}

#[cfg(not(windows))]
fn remove_non_directory(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)
}

// Directory symlinks and junctions must go through remove_dir on Windows
#[cfg(windows)]
fn remove_non_directory(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path).or_else(|_| std::fs::remove_dir(path))
}

#[cfg(windows)]
fn clear_readonly(path: &Path) {
    if let Ok(md) = std::fs::symlink_metadata(path) {
        let mut perms = md.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
}

#[cfg(windows)]
fn clear_readonly_recursive(path: &Path) {
    clear_readonly(path);
    if let Ok(rd) = std::fs::read_dir(path) {
        for entry in rd.flatten() {
            let p = entry.path();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => clear_readonly_recursive(&p),
                _ => clear_readonly(&p),
            }
        }
    }
}
