//! Mapping between relative tree paths and remote node identities
//!
//! Paths are '/'-joined relative strings; the root is ".". Every legal path
//! maps to exactly one identity and back, so the walk can address remote
//! nodes purely from where it is in the local tree.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Category shared by every identity the daemon hands out
pub const CATEGORY: &str = "treesync";

/// Path of the tree root
pub const ROOT_PATH: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub category: String,
    pub name: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// Check a single path segment. Segments are non-empty, are not "." or "..",
/// and never contain a separator or NUL.
pub fn validate_segment(segment: &str) -> SyncResult<()> {
    if segment.is_empty() {
        return Err(SyncError::invalid_path(segment, "empty path segment"));
    }
    if segment == "." || segment == ".." {
        return Err(SyncError::invalid_path(segment, "relative path segment"));
    }
    if let Some(c) = segment.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(SyncError::invalid_path(
            segment,
            format!("segment contains reserved character {:?}", c),
        ));
    }
    Ok(())
}

/// Check a whole relative path ("." or seg/seg/...)
pub fn validate_path(path: &str) -> SyncResult<()> {
    if path == ROOT_PATH {
        return Ok(());
    }
    for segment in path.split('/') {
        validate_segment(segment).map_err(|e| match e {
            SyncError::InvalidPath { reason, .. } => SyncError::invalid_path(path, reason),
            other => other,
        })?;
    }
    Ok(())
}

pub fn path_to_identity(path: &str) -> SyncResult<Identity> {
    validate_path(path)?;
    Ok(Identity {
        category: CATEGORY.to_string(),
        name: path.to_string(),
    })
}

pub fn identity_to_path(identity: &Identity) -> SyncResult<String> {
    if identity.category != CATEGORY {
        return Err(SyncError::invalid_path(
            &identity.name,
            format!("unknown identity category `{}`", identity.category),
        ));
    }
    validate_path(&identity.name)?;
    Ok(identity.name.clone())
}

/// Final segment of a path, for display
pub fn path_to_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Join a validated segment onto a parent path
pub fn child_path(parent: &str, name: &str) -> SyncResult<String> {
    validate_segment(name)?;
    if parent == ROOT_PATH {
        Ok(name.to_string())
    } else {
        Ok(format!("{}/{}", parent, name))
    }
}

/// Parent of a path; the root has none
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(pos) => Some(&path[..pos]),
        None => Some(ROOT_PATH),
    }
}

/// Location of a tree path under a local root directory
pub fn local_path(root: &Path, path: &str) -> PathBuf {
    if path == ROOT_PATH {
        return root.to_path_buf();
    }
    let mut out = root.to_path_buf();
    for segment in path.split('/') {
        out.push(segment);
    }
    out
}

pub fn identity_to_string(identity: &Identity) -> String {
    identity.to_string()
}

pub fn string_to_identity(s: &str) -> SyncResult<Identity> {
    let (category, name) = s
        .split_once('/')
        .ok_or_else(|| SyncError::invalid_path(s, "identity has no category"))?;
    if category.is_empty() {
        return Err(SyncError::invalid_path(s, "identity has empty category"));
    }
    Ok(Identity {
        category: category.to_string(),
        name: name.to_string(),
    })
}

/// Network-addressable reference: `identity@host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub identity: Identity,
    pub endpoint: String,
}

impl Reference {
    pub fn new(identity: Identity, endpoint: impl Into<String>) -> Self {
        Self {
            identity,
            endpoint: endpoint.into(),
        }
    }

    /// Reference to the tree root served at `endpoint`
    pub fn root(endpoint: impl Into<String>) -> SyncResult<Self> {
        Ok(Self::new(path_to_identity(ROOT_PATH)?, endpoint))
    }

    pub fn parse(s: &str) -> SyncResult<Self> {
        let (ident, endpoint) = s
            .rsplit_once('@')
            .ok_or_else(|| SyncError::invalid_path(s, "reference has no endpoint"))?;
        if endpoint.trim().is_empty() {
            return Err(SyncError::invalid_path(s, "reference has empty endpoint"));
        }
        Ok(Self {
            identity: string_to_identity(ident)?,
            endpoint: endpoint.trim().to_string(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.endpoint)
    }
}
