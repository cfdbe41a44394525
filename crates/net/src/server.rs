//! gRPC service implementations.
//!
//! Bridges the tonic-generated service traits to the coordinator. The two
//! surfaces are deliberately separate services on one endpoint: the client
//! surface routes, the peer surface must already be routed. A peer call
//! for a key this node does not own is rejected, never forwarded again.

use crate::status::status_from;
use cachemesh_common::ClusterError;
use cachemesh_kv::{Coordinator, DurableStore, LegacySource, PeerClient, WriteOp};
use cachemesh_proto::cache::{
    DeleteReply, DeleteRequest, GetReply, GetRequest, SetReply, SetRequest,
};
use cachemesh_proto::peer::{Mutation, ReplicateAck, ReplicateRequest};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Client surface
// ---------------------------------------------------------------------------

pub struct CacheGrpc<P: PeerClient, D: DurableStore, L: LegacySource> {
    pub coordinator: Arc<Coordinator<P, D, L>>,
}

impl<P: PeerClient, D: DurableStore, L: LegacySource> std::fmt::Debug for CacheGrpc<P, D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGrpc").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<P: PeerClient, D: DurableStore, L: LegacySource>
    cachemesh_proto::cache::cache_service_server::CacheService for CacheGrpc<P, D, L>
{
    async fn get(
        &self,
        request: tonic::Request<GetRequest>,
    ) -> Result<tonic::Response<GetReply>, tonic::Status> {
        cachemesh_metrics::metrics().client_gets.inc();
        let _timer = cachemesh_metrics::start_op_timer("get");
        let req = request.into_inner();

        match self.coordinator.get(&req.key).await {
            Ok(value) => Ok(tonic::Response::new(GetReply { found: true, value })),
            Err(ClusterError::NotFound) => Ok(tonic::Response::new(GetReply {
                found: false,
                value: Vec::new(),
            })),
            Err(e) => Err(status_from(e)),
        }
    }

    async fn set(
        &self,
        request: tonic::Request<SetRequest>,
    ) -> Result<tonic::Response<SetReply>, tonic::Status> {
        cachemesh_metrics::metrics().client_sets.inc();
        let _timer = cachemesh_metrics::start_op_timer("set");
        let req = request.into_inner();

        self.coordinator
            .set(&req.key, req.value)
            .await
            .map_err(status_from)?;

        Ok(tonic::Response::new(SetReply {
            ok: true,
            err: String::new(),
        }))
    }

    async fn delete(
        &self,
        request: tonic::Request<DeleteRequest>,
    ) -> Result<tonic::Response<DeleteReply>, tonic::Status> {
        cachemesh_metrics::metrics().client_deletes.inc();
        let _timer = cachemesh_metrics::start_op_timer("delete");
        let req = request.into_inner();

        self.coordinator
            .delete(&req.key)
            .await
            .map_err(status_from)?;

        Ok(tonic::Response::new(DeleteReply { ok: true }))
    }
}

// ---------------------------------------------------------------------------
// Peer surface
// ---------------------------------------------------------------------------

pub struct PeerGrpc<P: PeerClient, D: DurableStore, L: LegacySource> {
    pub coordinator: Arc<Coordinator<P, D, L>>,
}

impl<P: PeerClient, D: DurableStore, L: LegacySource> std::fmt::Debug for PeerGrpc<P, D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerGrpc").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<P: PeerClient, D: DurableStore, L: LegacySource>
    cachemesh_proto::peer::peer_service_server::PeerService for PeerGrpc<P, D, L>
{
    async fn internal_get(
        &self,
        request: tonic::Request<GetRequest>,
    ) -> Result<tonic::Response<GetReply>, tonic::Status> {
        cachemesh_metrics::metrics()
            .peer_rpcs_received
            .with_label_values(&["internal_get"])
            .inc();
        let _timer = cachemesh_metrics::start_rpc_timer("internal_get", "inbound");
        let req = request.into_inner();

        match self.coordinator.internal_get(&req.key).await {
            Ok(value) => Ok(tonic::Response::new(GetReply { found: true, value })),
            Err(ClusterError::NotFound) => Ok(tonic::Response::new(GetReply {
                found: false,
                value: Vec::new(),
            })),
            Err(e) => Err(status_from(e)),
        }
    }

    async fn internal_set(
        &self,
        request: tonic::Request<SetRequest>,
    ) -> Result<tonic::Response<SetReply>, tonic::Status> {
        cachemesh_metrics::metrics()
            .peer_rpcs_received
            .with_label_values(&["internal_set"])
            .inc();
        let _timer = cachemesh_metrics::start_rpc_timer("internal_set", "inbound");
        let req = request.into_inner();

        self.coordinator
            .internal_set(&req.key, req.value)
            .await
            .map_err(status_from)?;

        Ok(tonic::Response::new(SetReply {
            ok: true,
            err: String::new(),
        }))
    }

    async fn internal_delete(
        &self,
        request: tonic::Request<DeleteRequest>,
    ) -> Result<tonic::Response<DeleteReply>, tonic::Status> {
        cachemesh_metrics::metrics()
            .peer_rpcs_received
            .with_label_values(&["internal_delete"])
            .inc();
        let _timer = cachemesh_metrics::start_rpc_timer("internal_delete", "inbound");
        let req = request.into_inner();

        self.coordinator
            .internal_delete(&req.key)
            .await
            .map_err(status_from)?;

        Ok(tonic::Response::new(DeleteReply { ok: true }))
    }

    async fn replicate(
        &self,
        request: tonic::Request<ReplicateRequest>,
    ) -> Result<tonic::Response<ReplicateAck>, tonic::Status> {
        cachemesh_metrics::metrics()
            .peer_rpcs_received
            .with_label_values(&["replicate"])
            .inc();
        let _timer = cachemesh_metrics::start_rpc_timer("replicate", "inbound");
        let req = request.into_inner();

        let op = match req.op() {
            Mutation::Set => WriteOp::Set(req.value),
            Mutation::Delete => WriteOp::Delete,
        };

        self.coordinator
            .apply_replication(&req.key, op)
            .map_err(status_from)?;

        Ok(tonic::Response::new(ReplicateAck { ok: true }))
    }
}
