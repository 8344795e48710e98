//! Local state classification for a single path

use crate::error::{SyncError, SyncResult};
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFileState {
    Absent,
    Directory,
    RegularFile,
    /// Anything else: sockets, fifos, devices, dangling symlinks
    Unknown,
}

impl LocalFileState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Directory => "directory",
            Self::RegularFile => "regular file",
            Self::Unknown => "unknown file",
        }
    }
}

/// Classify `path` without touching it. Symlinks are followed; a link whose
/// target is missing still occupies the name and is reported as `Unknown`.
/// Errors other than not-found are returned, never folded into `Unknown`.
pub fn probe(path: &Path) -> SyncResult<LocalFileState> {
    match std::fs::metadata(path) {
        Ok(md) => {
            let ft = md.file_type();
            if ft.is_dir() {
                Ok(LocalFileState::Directory)
            } else if ft.is_file() {
                Ok(LocalFileState::RegularFile)
            } else {
                Ok(LocalFileState::Unknown)
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => match std::fs::symlink_metadata(path) {
            Ok(_) => Ok(LocalFileState::Unknown),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LocalFileState::Absent),
            Err(e) => Err(SyncError::local_io("probe", path, e)),
        },
        Err(e) => Err(SyncError::local_io("probe", path, e)),
    }
}
