//! Daemon-side view of the served tree

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

use crate::checksum::Checksum;
use crate::identity::{
    child_path, identity_to_path, local_path, path_to_identity, string_to_identity,
    validate_segment,
};
use crate::node::{DirectoryDesc, FileDesc, NodeDesc};
use crate::protocol::{error_code, MAX_CHUNK_SIZE};
use crate::protocol_core::compress_stream;

// In-memory compressed bodies are dropped wholesale past this size
const CACHE_LIMIT: usize = 256 * 1024 * 1024;
// Compressed bodies larger than this live in an unnamed temporary file
const SPILL_LIMIT: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn code(&self) -> u8 {
        match self {
            Self::AccessDenied(_) => error_code::ACCESS_DENIED,
            Self::NotFound(_) => error_code::NOT_FOUND,
            Self::BadRequest(_) => error_code::BAD_REQUEST,
            Self::Internal(_) => error_code::INTERNAL,
        }
    }

    fn from_io(path: &Path, e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            ErrorKind::PermissionDenied => Self::AccessDenied(format!("{}: {}", path.display(), e)),
            _ => Self::Internal(format!("{}: {}", path.display(), e)),
        }
    }
}

struct Blob {
    len: u64,
    mtime: Option<SystemTime>,
    checksum: Checksum,
    body: Body,
}

/// A compressed stream, held in memory or spilled to disk
enum Body {
    Memory(Vec<u8>),
    Spilled { file: Mutex<File>, len: u64 },
}

impl Body {
    fn len(&self) -> u64 {
        match self {
            Self::Memory(v) => v.len() as u64,
            Self::Spilled { len, .. } => *len,
        }
    }

    /// Bytes counted against the in-memory cache limit
    fn resident(&self) -> usize {
        match self {
            Self::Memory(v) => v.len(),
            Self::Spilled { .. } => 0,
        }
    }

    fn read_at(&self, offset: u64, max: u64) -> std::io::Result<Vec<u8>> {
        let start = offset.min(self.len());
        let end = offset.saturating_add(max).min(self.len());
        match self {
            Self::Memory(v) => Ok(v[start as usize..end as usize].to_vec()),
            Self::Spilled { file, .. } => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(start))?;
                let mut out = Vec::with_capacity((end - start) as usize);
                (&mut *file).take(end - start).read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// Collects a compressed stream in memory until it outgrows `limit`, then
/// moves it to a temporary file
struct SpillWriter {
    mem: Vec<u8>,
    file: Option<File>,
    len: u64,
    limit: usize,
}

impl SpillWriter {
    fn new(limit: usize) -> Self {
        Self {
            mem: Vec::new(),
            file: None,
            len: 0,
            limit,
        }
    }

    fn into_body(self) -> std::io::Result<Body> {
        match self.file {
            Some(mut file) => {
                file.flush()?;
                Ok(Body::Spilled {
                    file: Mutex::new(file),
                    len: self.len,
                })
            }
            None => Ok(Body::Memory(self.mem)),
        }
    }
}

impl Write for SpillWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.file.is_none() && self.mem.len() + buf.len() > self.limit {
            let mut file = tempfile::tempfile()?;
            file.write_all(&self.mem)?;
            self.mem = Vec::new();
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => file.write_all(buf)?,
            None => self.mem.extend_from_slice(buf),
        }
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

pub struct TreeStore {
    root: PathBuf,
    cache: Mutex<HashMap<PathBuf, Arc<Blob>>>,
    cached_bytes: Mutex<usize>,
    spill_limit: usize,
}

impl TreeStore {
    /// `root` must exist and be a directory
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let root = root.canonicalize()?;
        if !root.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }
        Ok(Self {
            root,
            cache: Mutex::new(HashMap::new()),
            cached_bytes: Mutex::new(0),
            spill_limit: SPILL_LIMIT,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an identity string to a tree path and a location that is
    /// guaranteed to lie under the root
    fn locate(&self, identity: &str) -> Result<(String, PathBuf), StoreError> {
        let id = string_to_identity(identity).map_err(|e| StoreError::BadRequest(e.to_string()))?;
        let tree_path = identity_to_path(&id).map_err(|e| StoreError::BadRequest(e.to_string()))?;
        let joined = local_path(&self.root, &tree_path);
        let resolved = joined
            .canonicalize()
            .map_err(|e| StoreError::from_io(&joined, e))?;
        if !resolved.starts_with(&self.root) {
            return Err(StoreError::AccessDenied(format!("{} is outside the served root", tree_path)));
        }
        Ok((tree_path, resolved))
    }

    pub fn describe(&self, identity: &str) -> Result<NodeDesc, StoreError> {
        let (tree_path, resolved) = self.locate(identity)?;
        let md = std::fs::metadata(&resolved).map_err(|e| StoreError::from_io(&resolved, e))?;
        if md.is_dir() {
            let contents = self.list(&tree_path, &resolved)?;
            Ok(NodeDesc::Directory(DirectoryDesc {
                directory: ident(&tree_path)?,
                contents,
            }))
        } else if md.is_file() {
            let blob = self.blob(&resolved)?;
            Ok(NodeDesc::File(FileDesc {
                file: ident(&tree_path)?,
                checksum: blob.checksum,
            }))
        } else {
            Err(StoreError::AccessDenied(format!("{} is not a file or directory", tree_path)))
        }
    }

    fn list(&self, tree_path: &str, dir: &Path) -> Result<Vec<NodeDesc>, StoreError> {
        let rd = std::fs::read_dir(dir).map_err(|e| StoreError::from_io(dir, e))?;
        let mut names: Vec<String> = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|e| StoreError::from_io(dir, e))?;
            match entry.file_name().into_string() {
                Ok(name) if validate_segment(&name).is_ok() => names.push(name),
                Ok(name) => eprintln!("skipping {:?}: not a legal path segment", name),
                Err(name) => eprintln!("skipping {:?}: name is not utf-8", name),
            }
        }
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let child = child_path(tree_path, &name).map_err(|e| StoreError::Internal(e.to_string()))?;
            let p = dir.join(&name);
            let canonical = match p.canonicalize() {
                Ok(c) if c.starts_with(&self.root) => c,
                Ok(_) => {
                    eprintln!("skipping {}: points outside the served root", child);
                    continue;
                }
                Err(e) => {
                    eprintln!("skipping {}: {}", child, e);
                    continue;
                }
            };
            let md = std::fs::metadata(&canonical).map_err(|e| StoreError::from_io(&canonical, e))?;
            if md.is_dir() {
                out.push(NodeDesc::Directory(DirectoryDesc {
                    directory: ident(&child)?,
                    contents: Vec::new(),
                }));
            } else if md.is_file() {
                let blob = self.blob(&canonical)?;
                out.push(NodeDesc::File(FileDesc {
                    file: ident(&child)?,
                    checksum: blob.checksum,
                }));
            } else {
                eprintln!("skipping {}: not a regular file or directory", child);
            }
        }
        Ok(out)
    }

    /// Up to `max` bytes of the compressed body from `offset`; empty at the end
    pub fn get_chunk(&self, identity: &str, offset: u64, max: u32) -> Result<Vec<u8>, StoreError> {
        let (tree_path, resolved) = self.locate(identity)?;
        let md = std::fs::metadata(&resolved).map_err(|e| StoreError::from_io(&resolved, e))?;
        if !md.is_file() {
            return Err(StoreError::BadRequest(format!("{} is not a file", tree_path)));
        }
        let blob = self.blob(&resolved)?;
        blob.body
            .read_at(offset, max.min(MAX_CHUNK_SIZE) as u64)
            .map_err(|e| StoreError::Internal(format!("{}: {}", resolved.display(), e)))
    }

    /// Checksum and compressed body of a file, streamed from disk once and
    /// cached until its size or mtime changes
    fn blob(&self, path: &Path) -> Result<Arc<Blob>, StoreError> {
        let md = std::fs::metadata(path).map_err(|e| StoreError::from_io(path, e))?;
        let mtime = md.modified().ok();
        if let Some(b) = self.cache.lock().get(path) {
            if b.len == md.len() && b.mtime == mtime && mtime.is_some() {
                return Ok(b.clone());
            }
        }

        let file = File::open(path).map_err(|e| StoreError::from_io(path, e))?;
        let mut hasher = md5::Context::new();
        let (len, body) = compress_stream(file, SpillWriter::new(self.spill_limit), |b| {
            hasher.consume(b)
        })
        .and_then(|(len, writer)| Ok((len, writer.into_body()?)))
        .map_err(|e| StoreError::from_io(path, e))?;
        let blob = Arc::new(Blob {
            len,
            mtime,
            checksum: Checksum(hasher.compute().0),
            body,
        });

        let mut cache = self.cache.lock();
        let mut cached = self.cached_bytes.lock();
        if *cached + blob.body.resident() > CACHE_LIMIT {
            cache.clear();
            *cached = 0;
        }
        *cached += blob.body.resident();
        if let Some(old) = cache.insert(path.to_path_buf(), blob.clone()) {
            *cached = cached.saturating_sub(old.body.resident());
        }
        Ok(blob)
    }
}

fn ident(tree_path: &str) -> Result<crate::identity::Identity, StoreError> {
    path_to_identity(tree_path).map_err(|e| StoreError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn store_with_tree() -> (TempDir, TreeStore) {
        let tmp = TempDir::new().unwrap();
        let r = tmp.path();
        fs::create_dir_all(r.join("b_dir/inner")).unwrap();
        fs::write(r.join("a.txt"), b"alpha").unwrap();
        fs::write(r.join("b_dir/c.txt"), b"gamma").unwrap();
        let store = TreeStore::open(r).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_describe_root_lists_sorted_children() {
        let (_tmp, store) = store_with_tree();
        let node = store.describe("treesync/.").unwrap();
        let dir = match node {
            NodeDesc::Directory(d) => d,
            other => panic!("expected directory, got {:?}", other),
        };
        let names: Vec<&str> = dir.contents.iter().map(|n| n.identity().name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b_dir"]);
        match &dir.contents[0] {
            NodeDesc::File(f) => assert_eq!(f.checksum, Checksum::of_bytes(b"alpha")),
            other => panic!("expected file, got {:?}", other),
        }
        match &dir.contents[1] {
            NodeDesc::Directory(d) => assert!(d.contents.is_empty()),
            other => panic!("expected directory, got {:?}", other),
        }
    }

    #[test]
    fn test_describe_nested() {
        let (_tmp, store) = store_with_tree();
        match store.describe("treesync/b_dir").unwrap() {
            NodeDesc::Directory(d) => {
                let names: Vec<&str> = d.contents.iter().map(|n| n.identity().name.as_str()).collect();
                assert_eq!(names, vec!["b_dir/c.txt", "b_dir/inner"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_describe_errors() {
        let (_tmp, store) = store_with_tree();
        assert!(matches!(store.describe("treesync/missing"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.describe("treesync/../etc"), Err(StoreError::BadRequest(_))));
        assert!(matches!(store.describe("other/a.txt"), Err(StoreError::BadRequest(_))));
        assert!(matches!(store.describe("garbage"), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_chunks_reassemble() {
        let (tmp, store) = store_with_tree();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 253) as u8).collect();
        fs::write(tmp.path().join("big"), &data).unwrap();

        let mut compressed = Vec::new();
        loop {
            let c = store.get_chunk("treesync/big", compressed.len() as u64, 1000).unwrap();
            if c.is_empty() {
                break;
            }
            assert!(c.len() <= 1000);
            compressed.extend_from_slice(&c);
        }
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&compressed[..]).read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        // Past the end
        assert!(store.get_chunk("treesync/big", u64::MAX, 10).unwrap().is_empty());
        // Directories have no content
        assert!(matches!(store.get_chunk("treesync/b_dir", 0, 10), Err(StoreError::BadRequest(_))));
    }

    #[test]
    fn test_large_body_spills_to_disk() {
        let (tmp, mut store) = store_with_tree();
        store.spill_limit = 4096;
        let mut x: u32 = 0x9e37_79b9;
        let data: Vec<u8> = (0..200_000)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect();
        fs::write(tmp.path().join("big"), &data).unwrap();

        match store.describe("treesync/big").unwrap() {
            NodeDesc::File(f) => assert_eq!(f.checksum, Checksum::of_bytes(&data)),
            other => panic!("expected file, got {:?}", other),
        }
        let blob = store.blob(&tmp.path().join("big").canonicalize().unwrap()).unwrap();
        assert!(matches!(blob.body, Body::Spilled { .. }));
        assert_eq!(blob.len, data.len() as u64);
        // Only the small files from the fixture are held in memory
        assert!(*store.cached_bytes.lock() < 4096);

        let mut compressed = Vec::new();
        loop {
            let c = store.get_chunk("treesync/big", compressed.len() as u64, 7000).unwrap();
            if c.is_empty() {
                break;
            }
            compressed.extend_from_slice(&c);
        }
        assert_eq!(compressed.len() as u64, blob.body.len());
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&compressed[..]).read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_cache_invalidated_on_change() {
        let (tmp, store) = store_with_tree();
        let p = tmp.path().join("a.txt");
        let before = store.describe("treesync/a.txt").unwrap();
        fs::write(&p, b"a different and longer body").unwrap();
        let after = store.describe("treesync/a.txt").unwrap();
        assert_ne!(before, after);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_root_hidden() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), b"s").unwrap();
        let (tmp, store) = store_with_tree();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();

        match store.describe("treesync/.").unwrap() {
            NodeDesc::Directory(d) => {
                assert!(d.contents.iter().all(|n| n.identity().name != "escape"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            store.describe("treesync/escape/secret"),
            Err(StoreError::AccessDenied(_))
        ));
    }
}
