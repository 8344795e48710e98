//! The remote side as the reconciler sees it

use crate::error::SyncResult;
use crate::identity::Identity;
use crate::node::NodeDesc;
use async_trait::async_trait;

/// Requests are issued one at a time; implementations need not support
/// concurrent calls.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Describe one node. For a directory the result lists its immediate
    /// children. Fails with `AccessDenied` when the remote refuses.
    async fn describe(&self, identity: &Identity) -> SyncResult<NodeDesc>;

    /// Up to `max` bytes of the file's compressed content starting at
    /// compressed offset `offset`. Empty means end of content.
    async fn get_chunk(&self, identity: &Identity, offset: u64, max: u32) -> SyncResult<Vec<u8>>;
}
