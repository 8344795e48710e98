//! Tree reconciliation: make the local tree under a root match the remote
//! description.
//!
//! The walk is depth-first and pre-order. Every node is probed afresh, the
//! repair plan for its (local state, remote kind) pair is applied, and only
//! then are a directory's children visited. Nothing is cached between nodes
//! and nothing runs concurrently. The first error stops the walk; nodes
//! already reconciled are left as they are.

use crate::checksum::file_checksum;
use crate::error::{SyncError, SyncResult};
use crate::fetch::{fetch_file, FetchOptions};
use crate::fs_ops::{create_directory, ensure_dir_exists, remove_recursive};
use crate::identity::{
    identity_to_path, local_path, parent_path, path_to_identity, path_to_name, ROOT_PATH,
};
use crate::logger::{Logger, NodeVisit};
use crate::node::{DirectoryDesc, FileDesc, NodeDesc, NodeKind};
use crate::probe::{probe, LocalFileState};
use crate::remote::Remote;
use std::path::{Path, PathBuf};

/// One repair step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Remove the entry currently at the path (whole tree for directories)
    Remove,
    CreateDirectory,
    Fetch,
    /// Hash the local file; skip when it matches, otherwise remove and fetch
    CompareChecksum,
}

/// Repair plan for a node. Removal always precedes the replacement.
pub fn plan(local: LocalFileState, remote: NodeKind) -> &'static [Step] {
    use LocalFileState::*;
    match (local, remote) {
        (Absent, NodeKind::Directory) => &[Step::CreateDirectory],
        (Directory, NodeKind::Directory) => &[],
        (RegularFile | Unknown, NodeKind::Directory) => &[Step::Remove, Step::CreateDirectory],
        (Absent, NodeKind::File) => &[Step::Fetch],
        (RegularFile, NodeKind::File) => &[Step::CompareChecksum],
        (Directory | Unknown, NodeKind::File) => &[Step::Remove, Step::Fetch],
    }
}

/// What was actually done to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Removed(LocalFileState),
    CreatedDirectory,
    Fetched { bytes: u64, chunks: u64 },
    UpToDate,
}

impl Action {
    pub fn label(&self) -> String {
        match self {
            Action::Removed(LocalFileState::Directory) => "removed directory".into(),
            Action::Removed(LocalFileState::RegularFile) => "removed file".into(),
            Action::Removed(_) => "removed unknown file".into(),
            Action::CreatedDirectory => "created directory".into(),
            Action::Fetched { bytes, .. } => format!("got file ({} bytes)", bytes),
            Action::UpToDate => "up to date".into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub directories_visited: u64,
    pub directories_created: u64,
    pub files_fetched: u64,
    pub files_up_to_date: u64,
    pub entries_removed: u64,
    pub bytes_fetched: u64,
    pub compressed_bytes: u64,
    pub chunk_requests: u64,
}

impl RunStats {
    /// Number of mutating actions taken on the local tree
    pub fn changes(&self) -> u64 {
        self.directories_created + self.files_fetched + self.entries_removed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub fetch: FetchOptions,
}

struct Work {
    node: NodeDesc,
    parent: String,
    indent: String,
    last: bool,
}

pub struct Reconciler<'a, R: Remote + ?Sized> {
    remote: &'a R,
    root: PathBuf,
    logger: &'a dyn Logger,
    opts: ReconcileOptions,
}

impl<'a, R: Remote + ?Sized> Reconciler<'a, R> {
    pub fn new(remote: &'a R, root: impl Into<PathBuf>, logger: &'a dyn Logger) -> Self {
        Self {
            remote,
            root: root.into(),
            logger,
            opts: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: ReconcileOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Reconcile the whole tree
    pub async fn run(&self) -> SyncResult<RunStats> {
        let mut stats = RunStats::default();
        match self.walk(&mut stats).await {
            Ok(()) => Ok(stats),
            Err((path, e)) => {
                self.logger.error(&path, &e);
                Err(e)
            }
        }
    }

    async fn walk(&self, stats: &mut RunStats) -> Result<(), (String, SyncError)> {
        let at = |path: &str| {
            let path = path.to_string();
            move |e: SyncError| (path, e)
        };

        let root = self.describe_root().await.map_err(at(ROOT_PATH))?;
        self.prepare_local_root().map_err(at(ROOT_PATH))?;
        stats.directories_visited += 1;
        self.logger.root(path_to_name(ROOT_PATH));

        let mut stack: Vec<Work> = Vec::new();
        push_children(&mut stack, root, ROOT_PATH, "");

        while let Some(work) = stack.pop() {
            let path = self.child_path_of(&work).map_err(at(&work.parent))?;
            let visit = NodeVisit {
                path: &path,
                name: path_to_name(&path),
                kind: work.node.kind(),
                indent: &work.indent,
                last: work.last,
            };
            self.logger.enter(&visit);

            let listing = match self.visit(&path, &work.node, stats).await {
                Ok(listing) => listing,
                Err(e) => {
                    self.logger.failed(&visit, &e);
                    return Err((path, e));
                }
            };
            self.logger.leave(&visit);

            if let Some(dir) = listing {
                let indent = if work.last {
                    format!("{}  ", work.indent)
                } else {
                    format!("{}| ", work.indent)
                };
                push_children(&mut stack, dir, &path, &indent);
            }
        }
        Ok(())
    }

    async fn describe_root(&self) -> SyncResult<DirectoryDesc> {
        let identity = path_to_identity(ROOT_PATH)?;
        match self.remote.describe(&identity).await? {
            NodeDesc::Directory(dir) => {
                if identity_to_path(&dir.directory)? != ROOT_PATH {
                    return Err(SyncError::invalid_path(
                        dir.directory.name.clone(),
                        "remote root does not map to the root path",
                    ));
                }
                Ok(dir)
            }
            NodeDesc::File(_) => Err(SyncError::RootNotDirectory {
                path: format!("remote {}", ROOT_PATH),
            }),
        }
    }

    fn prepare_local_root(&self) -> SyncResult<()> {
        match probe(&self.root)? {
            LocalFileState::Directory => Ok(()),
            LocalFileState::Absent => ensure_dir_exists(&self.root),
            _ => Err(SyncError::RootNotDirectory {
                path: self.root.display().to_string(),
            }),
        }
    }

    /// Path of a listed child; it must sit directly under the directory
    /// that listed it
    fn child_path_of(&self, work: &Work) -> SyncResult<String> {
        let path = identity_to_path(work.node.identity())?;
        if path == ROOT_PATH || parent_path(&path) != Some(work.parent.as_str()) {
            return Err(SyncError::invalid_path(
                path,
                format!("listed under `{}` but is not a direct child", work.parent),
            ));
        }
        Ok(path)
    }

    /// Repair one node. For directories, returns the directory's own listing.
    async fn visit(
        &self,
        path: &str,
        node: &NodeDesc,
        stats: &mut RunStats,
    ) -> SyncResult<Option<DirectoryDesc>> {
        let local = local_path(&self.root, path);
        let state = probe(&local)?;

        for step in plan(state, node.kind()) {
            match step {
                Step::Remove => self.remove(path, &local, state, stats)?,
                Step::CreateDirectory => {
                    create_directory(&local)?;
                    stats.directories_created += 1;
                    self.logger.action(path, &Action::CreatedDirectory);
                }
                Step::Fetch => self.fetch(path, &local, file_desc(node)?, stats).await?,
                Step::CompareChecksum => {
                    let desc = file_desc(node)?;
                    if file_checksum(&local)? == desc.checksum {
                        stats.files_up_to_date += 1;
                        self.logger.action(path, &Action::UpToDate);
                    } else {
                        self.remove(path, &local, state, stats)?;
                        self.fetch(path, &local, desc, stats).await?;
                    }
                }
            }
        }

        match node {
            NodeDesc::Directory(dir) => {
                stats.directories_visited += 1;
                match self.remote.describe(&dir.directory).await? {
                    NodeDesc::Directory(listing) => Ok(Some(listing)),
                    NodeDesc::File(_) => Err(SyncError::protocol(format!(
                        "`{}` was listed as a directory but describes as a file",
                        path
                    ))),
                }
            }
            NodeDesc::File(_) => Ok(None),
        }
    }

    fn remove(
        &self,
        path: &str,
        local: &Path,
        state: LocalFileState,
        stats: &mut RunStats,
    ) -> SyncResult<()> {
        remove_recursive(local)?;
        stats.entries_removed += 1;
        self.logger.action(path, &Action::Removed(state));
        Ok(())
    }

    async fn fetch(
        &self,
        path: &str,
        local: &Path,
        desc: &FileDesc,
        stats: &mut RunStats,
    ) -> SyncResult<()> {
        let fs = fetch_file(self.remote, desc, path, local, self.opts.fetch).await?;
        stats.files_fetched += 1;
        stats.bytes_fetched += fs.bytes_written;
        stats.compressed_bytes += fs.compressed_bytes;
        stats.chunk_requests += fs.chunks + 1;
        self.logger.action(
            path,
            &Action::Fetched {
                bytes: fs.bytes_written,
                chunks: fs.chunks,
            },
        );
        Ok(())
    }
}

fn file_desc(node: &NodeDesc) -> SyncResult<&FileDesc> {
    match node {
        NodeDesc::File(f) => Ok(f),
        NodeDesc::Directory(d) => Err(SyncError::protocol(format!(
            "expected a file description for `{}`",
            d.directory
        ))),
    }
}

// Reversed so the first child is popped first
fn push_children(stack: &mut Vec<Work>, dir: DirectoryDesc, parent: &str, indent: &str) {
    let n = dir.contents.len();
    for (i, node) in dir.contents.into_iter().enumerate().rev() {
        stack.push(Work {
            node,
            parent: parent.to_string(),
            indent: indent.to_string(),
            last: i + 1 == n,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::logger::NoopLogger;
    use crate::test_support::MemoryRemote;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    /// Records every event as a line
    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    impl Logger for Recorder {
        fn enter(&self, node: &NodeVisit<'_>) {
            self.lines.lock().push(format!("enter {}", node.path));
        }
        fn action(&self, path: &str, action: &Action) {
            self.lines.lock().push(format!("{} {}", action.label(), path));
        }
        fn failed(&self, node: &NodeVisit<'_>, err: &SyncError) {
            self.lines.lock().push(format!("failed {} {}", node.path, err.kind()));
        }
    }

    fn sample_remote() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.add_file("a/b", b"content of b");
        remote
    }

    async fn run(remote: &MemoryRemote, root: &Path) -> SyncResult<RunStats> {
        let logger = NoopLogger;
        Reconciler::new(remote, root, &logger).run().await
    }

    #[test]
    fn test_plan_table() {
        use LocalFileState::*;
        assert_eq!(plan(Absent, NodeKind::Directory), &[Step::CreateDirectory]);
        assert!(plan(Directory, NodeKind::Directory).is_empty());
        assert_eq!(plan(RegularFile, NodeKind::Directory), &[Step::Remove, Step::CreateDirectory]);
        assert_eq!(plan(Unknown, NodeKind::Directory), &[Step::Remove, Step::CreateDirectory]);
        assert_eq!(plan(Absent, NodeKind::File), &[Step::Fetch]);
        assert_eq!(plan(Directory, NodeKind::File), &[Step::Remove, Step::Fetch]);
        assert_eq!(plan(RegularFile, NodeKind::File), &[Step::CompareChecksum]);
        assert_eq!(plan(Unknown, NodeKind::File), &[Step::Remove, Step::Fetch]);
    }

    #[tokio::test]
    async fn test_empty_local_tree() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();

        let stats = run(&remote, tmp.path()).await.unwrap();

        assert!(tmp.path().join("a").is_dir());
        let b = tmp.path().join("a/b");
        assert_eq!(fs::read(&b).unwrap(), b"content of b");
        assert_eq!(file_checksum(&b).unwrap(), Checksum::of_bytes(b"content of b"));
        assert_eq!(stats.directories_created, 1);
        assert_eq!(stats.files_fetched, 1);
        assert_eq!(stats.entries_removed, 0);
    }

    #[tokio::test]
    async fn test_matching_file_issues_no_chunk_requests() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a/b"), b"content of b").unwrap();

        let stats = run(&remote, tmp.path()).await.unwrap();

        assert_eq!(remote.chunk_calls(), 0);
        assert_eq!(stats.changes(), 0);
        assert_eq!(stats.files_up_to_date, 1);
    }

    #[tokio::test]
    async fn test_regular_file_where_directory_expected() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a"), b"i am in the way").unwrap();

        let recorder = Recorder::default();
        let stats = Reconciler::new(&remote, tmp.path(), &recorder).run().await.unwrap();

        assert!(tmp.path().join("a").is_dir());
        assert_eq!(fs::read(tmp.path().join("a/b")).unwrap(), b"content of b");
        assert_eq!(stats.entries_removed, 1);
        assert_eq!(
            *recorder.lines.lock(),
            vec![
                "enter a".to_string(),
                "removed file a".to_string(),
                "created directory a".to_string(),
                "enter a/b".to_string(),
                "got file (12 bytes) a/b".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_directory_where_file_expected() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/deep/er")).unwrap();
        fs::write(tmp.path().join("a/b/deep/er/x"), b"x").unwrap();

        run(&remote, tmp.path()).await.unwrap();
        assert!(tmp.path().join("a/b").is_file());
        assert_eq!(fs::read(tmp.path().join("a/b")).unwrap(), b"content of b");
    }

    #[tokio::test]
    async fn test_changed_file_is_refetched() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a/b"), b"old content, longer than the new one").unwrap();

        let stats = run(&remote, tmp.path()).await.unwrap();
        assert_eq!(fs::read(tmp.path().join("a/b")).unwrap(), b"content of b");
        assert_eq!(stats.entries_removed, 1);
        assert_eq!(stats.files_fetched, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unknown_entries_replaced() {
        let remote = MemoryRemote::new();
        remote.add_dir("d");
        remote.add_file("f", b"file");
        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(tmp.path().join("nowhere"), tmp.path().join("d")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("nowhere"), tmp.path().join("f")).unwrap();

        let stats = run(&remote, tmp.path()).await.unwrap();
        assert!(fs::symlink_metadata(tmp.path().join("d")).unwrap().is_dir());
        assert!(fs::symlink_metadata(tmp.path().join("f")).unwrap().is_file());
        assert_eq!(stats.entries_removed, 2);
    }

    #[tokio::test]
    async fn test_idempotent_second_run() {
        let remote = MemoryRemote::new();
        remote.add_file("top.txt", b"top");
        remote.add_file("x/y/z.bin", &vec![7u8; 100_000]);
        remote.add_dir("x/empty");
        remote.add_file("x/w", b"");
        let tmp = TempDir::new().unwrap();

        let first = run(&remote, tmp.path()).await.unwrap();
        assert!(first.changes() > 0);

        remote.reset_counters();
        let second = run(&remote, tmp.path()).await.unwrap();
        assert_eq!(second.changes(), 0);
        assert_eq!(second.files_up_to_date, 3);
        assert_eq!(remote.chunk_calls(), 0);
        // Each directory is listed once: the root, x, x/y and x/empty
        assert_eq!(remote.describe_calls(), 4);
        assert_eq!(second.directories_visited, 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convergence_from_conflicting_state() {
        let remote = MemoryRemote::new();
        remote.add_file("d1/f1", b"one");
        remote.add_file("d1/d2/f2", b"two");
        remote.add_dir("d3");
        remote.add_file("f3", b"three");

        let tmp = TempDir::new().unwrap();
        let r = tmp.path();
        // Every remote path occupied by the wrong kind of entry
        fs::write(r.join("d1"), b"not a dir").unwrap();
        fs::create_dir_all(r.join("f3/inner")).unwrap();
        std::os::unix::fs::symlink(r.join("nowhere"), r.join("d3")).unwrap();
        // Extra local entries outside the remote tree are left alone
        fs::write(r.join("extra"), b"keep").unwrap();

        run(&remote, r).await.unwrap();

        assert_eq!(fs::read(r.join("d1/f1")).unwrap(), b"one");
        assert_eq!(fs::read(r.join("d1/d2/f2")).unwrap(), b"two");
        assert!(r.join("d3").is_dir());
        assert_eq!(fs::read(r.join("f3")).unwrap(), b"three");
        assert_eq!(fs::read(r.join("extra")).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_traversal_is_preorder() {
        let remote = MemoryRemote::new();
        remote.add_file("a/1", b"1");
        remote.add_file("a/2", b"2");
        remote.add_file("b", b"b");
        let tmp = TempDir::new().unwrap();
        let recorder = Recorder::default();
        Reconciler::new(&remote, tmp.path(), &recorder).run().await.unwrap();

        let enters: Vec<String> = recorder
            .lines
            .lock()
            .iter()
            .filter(|l| l.starts_with("enter "))
            .cloned()
            .collect();
        assert_eq!(enters, vec!["enter a", "enter a/1", "enter a/2", "enter b"]);
    }

    #[tokio::test]
    async fn test_access_denied_aborts_walk() {
        let remote = MemoryRemote::new();
        remote.add_file("a/secret", b"s");
        remote.add_file("b", b"b");
        remote.deny("a");
        let tmp = TempDir::new().unwrap();

        let recorder = Recorder::default();
        let err = Reconciler::new(&remote, tmp.path(), &recorder).run().await.unwrap_err();
        assert_eq!(err.kind(), "access-denied");
        assert_eq!(err.path(), Some("a"));
        // Directory `a` was created before describing it; `b` was never reached
        assert!(tmp.path().join("a").is_dir());
        assert!(!tmp.path().join("b").exists());
        assert!(recorder.lines.lock().contains(&"failed a access-denied".to_string()));
    }

    #[tokio::test]
    async fn test_transfer_failure_aborts_walk() {
        let remote = MemoryRemote::new();
        remote.add_file("a", b"a");
        remote.add_file("b", b"b");
        remote.fail_chunks_after(0);
        let tmp = TempDir::new().unwrap();

        let err = run(&remote, tmp.path()).await.unwrap_err();
        assert_eq!(err.kind(), "transfer-failed");
        assert!(!tmp.path().join("b").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_local_entry_aborts_walk() {
        let remote = MemoryRemote::new();
        remote.add_file("a", b"a");
        remote.add_file("b", b"b");
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let loop_back = tmp.path().join("loop");
        std::os::unix::fs::symlink(&loop_back, &a).unwrap();
        std::os::unix::fs::symlink(&a, &loop_back).unwrap();

        let recorder = Recorder::default();
        let err = Reconciler::new(&remote, tmp.path(), &recorder).run().await.unwrap_err();
        assert_eq!(err.kind(), "local-io");
        // The looping link is left in place and `b` is never reached
        assert!(fs::symlink_metadata(&a).unwrap().file_type().is_symlink());
        assert!(!tmp.path().join("b").exists());
        assert_eq!(remote.chunk_calls(), 0);
        assert_eq!(
            *recorder.lines.lock(),
            vec!["enter a".to_string(), "failed a local-io".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_local_root_is_created() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("new/root");
        run(&remote, &root).await.unwrap();
        assert!(root.join("a/b").is_file());
    }

    #[tokio::test]
    async fn test_local_root_is_file() {
        let remote = sample_remote();
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("file");
        fs::write(&root, b"x").unwrap();
        let err = run(&remote, &root).await.unwrap_err();
        assert_eq!(err.kind(), "root-not-directory");
    }

    /// Remote whose listing names a grandchild directly under the root
    struct SkippingRemote(MemoryRemote);

    #[async_trait::async_trait]
    impl Remote for SkippingRemote {
        async fn describe(&self, identity: &crate::identity::Identity) -> SyncResult<NodeDesc> {
            let mut node = self.0.describe(identity).await?;
            if let NodeDesc::Directory(dir) = &mut node {
                if identity.name == ROOT_PATH {
                    dir.contents = vec![self.0.node("a/b").unwrap()];
                }
            }
            Ok(node)
        }
        async fn get_chunk(
            &self,
            identity: &crate::identity::Identity,
            offset: u64,
            max: u32,
        ) -> SyncResult<Vec<u8>> {
            self.0.get_chunk(identity, offset, max).await
        }
    }

    #[tokio::test]
    async fn test_non_child_identity_rejected() {
        let remote = SkippingRemote(sample_remote());
        let tmp = TempDir::new().unwrap();
        let logger = NoopLogger;
        let err = Reconciler::new(&remote, tmp.path(), &logger).run().await.unwrap_err();
        assert_eq!(err.kind(), "invalid-path");
        assert!(!tmp.path().join("a").exists());
    }
}
