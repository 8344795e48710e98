//! Error taxonomy for a synchronization run

use std::io;
use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Every failure a run can end with. None of these are retried by the core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("access denied for `{path}`: {reason}")]
    AccessDenied { path: String, reason: String },

    #[error("transfer of `{path}` failed at offset {offset}: {message}")]
    TransferFailed {
        path: String,
        offset: u64,
        message: String,
    },

    #[error("{op} `{path}` failed: {source}")]
    LocalIo {
        path: String,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("describing `{path}` failed: {message}")]
    Transport { path: String, message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("`{path}` is not a directory")]
    RootNotDirectory { path: String },
}

impl SyncError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn local_io(op: &'static str, path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.as_ref().display().to_string(),
            op,
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Stable short label used in reports and log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "invalid-path",
            Self::AccessDenied { .. } => "access-denied",
            Self::TransferFailed { .. } => "transfer-failed",
            Self::LocalIo { .. } => "local-io",
            Self::Transport { .. } => "transport",
            Self::Protocol { .. } => "protocol",
            Self::RootNotDirectory { .. } => "root-not-directory",
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::InvalidPath { path, .. }
            | Self::AccessDenied { path, .. }
            | Self::TransferFailed { path, .. }
            | Self::LocalIo { path, .. }
            | Self::Transport { path, .. }
            | Self::RootNotDirectory { path } => Some(path),
            Self::Protocol { .. } => None,
        }
    }

    /// True when the remote side refused the request rather than the local
    /// filesystem failing
    pub fn is_remote_refusal(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}
