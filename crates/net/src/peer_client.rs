//! gRPC client implementing `PeerClient`.
//!
//! One persistent channel per peer, built once from the fixed membership
//! at boot. Channels are lazy: tonic connects on first use and reconnects
//! after failures on its own. Every call carries a deadline, so a dead
//! peer costs at most `rpc_timeout` and surfaces `Unavailable` instead of
//! blocking the caller.

use crate::status::error_from;
use async_trait::async_trait;
use cachemesh_common::{ClusterError, NodeId};
use cachemesh_kv::{PeerClient, WriteOp};
use cachemesh_proto::cache::{DeleteRequest, GetRequest, SetRequest};
use cachemesh_proto::peer::peer_service_client::PeerServiceClient;
use cachemesh_proto::peer::{Mutation, ReplicateRequest};
use std::collections::HashMap;
use tokio::time::{timeout, Duration};
use tonic::transport::{Channel, Endpoint};

#[derive(Debug)]
pub struct GrpcPeerClient {
    channels: HashMap<NodeId, Channel>,
    rpc_timeout: Duration,
}

impl GrpcPeerClient {
    /// Build channels to every peer except `self_id`.
    pub fn new(
        peers: &[NodeId],
        self_id: &NodeId,
        connect_timeout: Duration,
        rpc_timeout: Duration,
    ) -> Result<Self, tonic::transport::Error> {
        let mut channels = HashMap::new();
        for peer in peers {
            if peer == self_id || channels.contains_key(peer) {
                continue;
            }
            let endpoint = Endpoint::from_shared(format!("http://{peer}"))?
                .connect_timeout(connect_timeout);
            channels.insert(peer.clone(), endpoint.connect_lazy());
        }
        tracing::debug!(peer_count = channels.len(), "peer channel pool ready");
        Ok(Self {
            channels,
            rpc_timeout,
        })
    }

    fn client(&self, target: &NodeId) -> Result<PeerServiceClient<Channel>, ClusterError> {
        let channel = self.channels.get(target).cloned().ok_or_else(|| {
            ClusterError::Unavailable(format!("no channel to peer {target}"))
        })?;
        Ok(PeerServiceClient::new(channel))
    }
}

/// Flatten the deadline layer: elapsed → `Unavailable`.
fn bounded<T>(
    result: Result<Result<tonic::Response<T>, tonic::Status>, tokio::time::error::Elapsed>,
    target: &NodeId,
) -> Result<T, ClusterError> {
    match result {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(error_from(status, target)),
        Err(_) => Err(ClusterError::Unavailable(format!(
            "peer {target}: rpc deadline exceeded"
        ))),
    }
}

#[async_trait]
impl PeerClient for GrpcPeerClient {
    async fn forward_get(&self, target: &NodeId, key: &str) -> Result<Vec<u8>, ClusterError> {
        let m = cachemesh_metrics::metrics();
        m.peer_rpcs_sent.with_label_values(&["internal_get"]).inc();
        let _timer = cachemesh_metrics::start_rpc_timer("internal_get", "outbound");

        let mut client = self.client(target)?;
        let request = GetRequest {
            key: key.to_string(),
        };
        let reply = bounded(
            timeout(self.rpc_timeout, client.internal_get(request)).await,
            target,
        )?;

        if reply.found {
            Ok(reply.value)
        } else {
            Err(ClusterError::NotFound)
        }
    }

    async fn forward_set(
        &self,
        target: &NodeId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), ClusterError> {
        let m = cachemesh_metrics::metrics();
        m.peer_rpcs_sent.with_label_values(&["internal_set"]).inc();
        let _timer = cachemesh_metrics::start_rpc_timer("internal_set", "outbound");

        let mut client = self.client(target)?;
        let request = SetRequest {
            key: key.to_string(),
            value,
        };
        bounded(
            timeout(self.rpc_timeout, client.internal_set(request)).await,
            target,
        )?;
        Ok(())
    }

    async fn forward_delete(&self, target: &NodeId, key: &str) -> Result<(), ClusterError> {
        let m = cachemesh_metrics::metrics();
        m.peer_rpcs_sent
            .with_label_values(&["internal_delete"])
            .inc();
        let _timer = cachemesh_metrics::start_rpc_timer("internal_delete", "outbound");

        let mut client = self.client(target)?;
        let request = DeleteRequest {
            key: key.to_string(),
        };
        bounded(
            timeout(self.rpc_timeout, client.internal_delete(request)).await,
            target,
        )?;
        Ok(())
    }

    async fn replicate(
        &self,
        target: &NodeId,
        key: &str,
        op: &WriteOp,
    ) -> Result<(), ClusterError> {
        let m = cachemesh_metrics::metrics();
        m.peer_rpcs_sent.with_label_values(&["replicate"]).inc();
        let _timer = cachemesh_metrics::start_rpc_timer("replicate", "outbound");

        let mut client = self.client(target)?;
        let request = match op {
            WriteOp::Set(value) => ReplicateRequest {
                key: key.to_string(),
                op: Mutation::Set as i32,
                value: value.clone(),
            },
            WriteOp::Delete => ReplicateRequest {
                key: key.to_string(),
                op: Mutation::Delete as i32,
                value: Vec::new(),
            },
        };
        bounded(
            timeout(self.rpc_timeout, client.replicate(request)).await,
            target,
        )?;
        Ok(())
    }
}
