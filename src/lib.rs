//! treesync: one-way file tree synchronization
//!
//! Makes a local directory tree match the tree served by a treesync daemon,
//! fetching only files whose checksum differs and replacing entries of the
//! wrong kind.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fs_ops;
pub mod identity;
pub mod logger;
pub mod net_async;
pub mod node;
pub mod probe;
pub mod protocol;
pub mod protocol_core;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{SyncError, SyncResult};
pub use reconcile::{Reconciler, RunStats};
