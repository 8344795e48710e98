use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::SyncError;
use crate::node::NodeKind;
use crate::reconcile::{Action, RunStats};

/// A node as the walk reaches it
#[derive(Debug, Clone, Copy)]
pub struct NodeVisit<'a> {
    pub path: &'a str,
    pub name: &'a str,
    pub kind: NodeKind,
    /// Tree-drawing prefix for this depth
    pub indent: &'a str,
    /// Last entry of its directory
    pub last: bool,
}

/// Receives run events in traversal order. Actions are reported once they
/// have completed.
pub trait Logger: Send + Sync {
    fn start(&self, _root: &Path, _reference: &str) {}
    fn root(&self, _name: &str) {}
    fn enter(&self, _node: &NodeVisit<'_>) {}
    fn action(&self, _path: &str, _action: &Action) {}
    fn leave(&self, _node: &NodeVisit<'_>) {}
    fn failed(&self, _node: &NodeVisit<'_>, _err: &SyncError) {}
    fn error(&self, _path: &str, _err: &SyncError) {}
    fn done(&self, _stats: &RunStats, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn start(&self, root: &Path, reference: &str) {
        self.line(&format!("START root={} remote={}", root.display(), reference));
    }
    fn action(&self, path: &str, action: &Action) {
        let line = match action {
            Action::Removed(state) => format!("REMOVE path={} was={}", path, state.label()),
            Action::CreatedDirectory => format!("MKDIR path={}", path),
            Action::Fetched { bytes, chunks } => {
                format!("FETCH path={} bytes={} chunks={}", path, bytes, chunks)
            }
            Action::UpToDate => format!("SKIP path={}", path),
        };
        self.line(&line);
    }
    fn error(&self, path: &str, err: &SyncError) {
        self.line(&format!("ERROR kind={} path={} msg={}", err.kind(), path, err));
    }
    fn done(&self, stats: &RunStats, seconds: f64) {
        self.line(&format!(
            "DONE dirs={} created={} fetched={} unchanged={} removed={} bytes={} seconds={:.3}",
            stats.directories_visited,
            stats.directories_created,
            stats.files_fetched,
            stats.files_up_to_date,
            stats.entries_removed,
            stats.bytes_fetched,
            seconds
        ));
    }
}

/// Prints the walk as a tree on stdout:
///
/// ```text
/// .
/// |
/// +-a... created directory... ok
/// | |
/// | +-b... got file (12 bytes)... ok
/// |
/// ```
pub struct TreePrinter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TreePrinter {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, s: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(s.as_bytes());
            let _ = out.flush();
        }
    }
}

impl Logger for TreePrinter {
    fn root(&self, name: &str) {
        self.emit(&format!("{}\n|\n", name));
    }
    fn enter(&self, node: &NodeVisit<'_>) {
        self.emit(&format!("{}+-{}... ", node.indent, node.name));
    }
    fn action(&self, _path: &str, action: &Action) {
        if *action != Action::UpToDate {
            self.emit(&format!("{}... ", action.label()));
        }
    }
    fn leave(&self, node: &NodeVisit<'_>) {
        match node.kind {
            NodeKind::Directory => {
                let child_indent = if node.last { "  " } else { "| " };
                self.emit(&format!("ok\n{}{}|\n", node.indent, child_indent));
            }
            NodeKind::File if node.last => self.emit(&format!("ok\n{}\n", node.indent)),
            NodeKind::File => self.emit("ok\n"),
        }
    }
    fn failed(&self, _node: &NodeVisit<'_>, err: &SyncError) {
        self.emit(&format!("failed ({})\n", err.kind()));
    }
}

/// Forwards every event to each inner logger in order
#[derive(Default)]
pub struct FanoutLogger {
    inner: Vec<Arc<dyn Logger>>,
}

impl FanoutLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, logger: Arc<dyn Logger>) {
        self.inner.push(logger);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Logger for FanoutLogger {
    fn start(&self, root: &Path, reference: &str) {
        self.inner.iter().for_each(|l| l.start(root, reference));
    }
    fn root(&self, name: &str) {
        self.inner.iter().for_each(|l| l.root(name));
    }
    fn enter(&self, node: &NodeVisit<'_>) {
        self.inner.iter().for_each(|l| l.enter(node));
    }
    fn action(&self, path: &str, action: &Action) {
        self.inner.iter().for_each(|l| l.action(path, action));
    }
    fn leave(&self, node: &NodeVisit<'_>) {
        self.inner.iter().for_each(|l| l.leave(node));
    }
    fn failed(&self, node: &NodeVisit<'_>, err: &SyncError) {
        self.inner.iter().for_each(|l| l.failed(node, err));
    }
    fn error(&self, path: &str, err: &SyncError) {
        self.inner.iter().for_each(|l| l.error(path, err));
    }
    fn done(&self, stats: &RunStats, seconds: f64) {
        self.inner.iter().for_each(|l| l.done(stats, seconds));
    }
}
