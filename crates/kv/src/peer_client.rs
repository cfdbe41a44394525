//! Contract for node-to-node RPC.

use crate::coordinator::WriteOp;
use async_trait::async_trait;
use cachemesh_common::{ClusterError, NodeId};

/// Client side of the peer surface.
///
/// The real implementation (`net::GrpcPeerClient`) holds a persistent
/// channel per peer and bounds every call with a deadline; an unreachable
/// peer surfaces `Unavailable` promptly rather than blocking. Forward
/// calls land on the key's owner and return the owner's verdict verbatim;
/// `replicate` mutates only the target's local store.
#[async_trait]
pub trait PeerClient: Send + Sync + 'static {
    async fn forward_get(&self, target: &NodeId, key: &str) -> Result<Vec<u8>, ClusterError>;

    async fn forward_set(
        &self,
        target: &NodeId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), ClusterError>;

    async fn forward_delete(&self, target: &NodeId, key: &str) -> Result<(), ClusterError>;

    async fn replicate(
        &self,
        target: &NodeId,
        key: &str,
        op: &WriteOp,
    ) -> Result<(), ClusterError>;
}
