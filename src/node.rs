//! Remote node descriptions

use crate::checksum::Checksum;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeDesc {
    Directory(DirectoryDesc),
    File(FileDesc),
}

/// A directory and its immediate children, in display order. Child
/// directories are shallow: their own `contents` are empty until they are
/// described themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryDesc {
    pub directory: Identity,
    pub contents: Vec<NodeDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDesc {
    pub file: Identity,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

impl NodeDesc {
    pub fn identity(&self) -> &Identity {
        match self {
            NodeDesc::Directory(d) => &d.directory,
            NodeDesc::File(f) => &f.file,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeDesc::Directory(_) => NodeKind::Directory,
            NodeDesc::File(_) => NodeKind::File,
        }
    }
}
