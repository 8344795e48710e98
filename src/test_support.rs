//! In-memory remote tree used by unit tests

use crate::checksum::Checksum;
use crate::error::{SyncError, SyncResult};
use crate::identity::{identity_to_path, parent_path, path_to_identity, ROOT_PATH};
use crate::node::{DirectoryDesc, FileDesc, NodeDesc};
use crate::protocol_core::compress_content;
use crate::remote::Remote;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

enum Entry {
    Dir,
    File { compressed: Vec<u8>, checksum: Checksum },
}

pub struct MemoryRemote {
    entries: Mutex<BTreeMap<String, Entry>>,
    denied: Mutex<HashSet<String>>,
    describe_calls: AtomicU64,
    chunk_calls: AtomicU64,
    fail_chunks_after: Mutex<Option<u64>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ROOT_PATH.to_string(), Entry::Dir);
        Self {
            entries: Mutex::new(entries),
            denied: Mutex::new(HashSet::new()),
            describe_calls: AtomicU64::new(0),
            chunk_calls: AtomicU64::new(0),
            fail_chunks_after: Mutex::new(None),
        }
    }

    fn add_parents(entries: &mut BTreeMap<String, Entry>, path: &str) {
        let mut cur = parent_path(path);
        while let Some(p) = cur {
            entries.entry(p.to_string()).or_insert(Entry::Dir);
            cur = parent_path(p);
        }
    }

    pub fn add_dir(&self, path: &str) {
        let mut entries = self.entries.lock();
        Self::add_parents(&mut entries, path);
        entries.insert(path.to_string(), Entry::Dir);
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let mut entries = self.entries.lock();
        Self::add_parents(&mut entries, path);
        entries.insert(
            path.to_string(),
            Entry::File {
                compressed: compress_content(data).expect("compress"),
                checksum: Checksum::of_bytes(data),
            },
        );
    }

    /// Rewrite the compressed stream served for `path`
    pub fn tamper_stream(&self, path: &str, edit: impl FnOnce(&mut Vec<u8>)) {
        if let Some(Entry::File { compressed, .. }) = self.entries.lock().get_mut(path) {
            edit(compressed);
        }
    }

    pub fn deny(&self, path: &str) {
        self.denied.lock().insert(path.to_string());
    }

    /// Let `n` chunk requests succeed, then fail every later one
    pub fn fail_chunks_after(&self, n: u64) {
        *self.fail_chunks_after.lock() = Some(n);
    }

    pub fn describe_calls(&self) -> u64 {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn chunk_calls(&self) -> u64 {
        self.chunk_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.describe_calls.store(0, Ordering::SeqCst);
        self.chunk_calls.store(0, Ordering::SeqCst);
    }

    pub fn compressed_len(&self, path: &str) -> usize {
        match self.entries.lock().get(path) {
            Some(Entry::File { compressed, .. }) => compressed.len(),
            _ => 0,
        }
    }

    /// Shallow description of one entry
    pub fn node(&self, path: &str) -> Option<NodeDesc> {
        let entries = self.entries.lock();
        Self::shallow(&entries, path)
    }

    fn shallow(entries: &BTreeMap<String, Entry>, path: &str) -> Option<NodeDesc> {
        let identity = path_to_identity(path).ok()?;
        match entries.get(path)? {
            Entry::Dir => Some(NodeDesc::Directory(DirectoryDesc {
                directory: identity,
                contents: Vec::new(),
            })),
            Entry::File { checksum, .. } => Some(NodeDesc::File(FileDesc {
                file: identity,
                checksum: *checksum,
            })),
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn describe(&self, identity: &crate::identity::Identity) -> SyncResult<NodeDesc> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let path = identity_to_path(identity)?;
        if self.denied.lock().contains(&path) {
            return Err(SyncError::AccessDenied {
                path,
                reason: "denied by test remote".into(),
            });
        }
        let entries = self.entries.lock();
        match Self::shallow(&entries, &path) {
            Some(NodeDesc::Directory(mut dir)) => {
                dir.contents = entries
                    .keys()
                    .filter(|k| k.as_str() != ROOT_PATH && parent_path(k) == Some(path.as_str()))
                    .filter_map(|k| Self::shallow(&entries, k))
                    .collect();
                Ok(NodeDesc::Directory(dir))
            }
            Some(file) => Ok(file),
            None => Err(SyncError::AccessDenied {
                path,
                reason: "no such node".into(),
            }),
        }
    }

    async fn get_chunk(
        &self,
        identity: &crate::identity::Identity,
        offset: u64,
        max: u32,
    ) -> SyncResult<Vec<u8>> {
        let prior = self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_chunks_after.lock() {
            if prior >= limit {
                return Err(SyncError::protocol("connection reset"));
            }
        }
        let path = identity_to_path(identity)?;
        match self.entries.lock().get(&path) {
            Some(Entry::File { compressed, .. }) => {
                let start = (offset as usize).min(compressed.len());
                let end = start.saturating_add(max as usize).min(compressed.len());
                Ok(compressed[start..end].to_vec())
            }
            _ => Err(SyncError::protocol(format!("no file at `{}`", path))),
        }
    }
}
