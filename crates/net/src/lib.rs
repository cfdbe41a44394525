//! gRPC networking layer for cachemesh.
//!
//! Provides:
//! - `CacheGrpc`: bridges the client surface proto to the coordinator
//! - `PeerGrpc`: bridges the peer surface proto (Internal* + Replicate)
//! - `GrpcPeerClient`: implements `PeerClient` over a pool of persistent
//!   tonic channels, one per peer, built at boot
//! - `build_server`: assembles both services into a tonic `Router`

pub mod peer_client;
pub mod server;
pub mod status;

pub use peer_client::GrpcPeerClient;
pub use server::{CacheGrpc, PeerGrpc};

use cachemesh_kv::{Coordinator, DurableStore, LegacySource, PeerClient};
use std::sync::Arc;

/// Build a tonic `Router` serving both RPC surfaces on one endpoint.
pub fn build_server<P: PeerClient, D: DurableStore, L: LegacySource>(
    coordinator: Arc<Coordinator<P, D, L>>,
) -> tonic::transport::server::Router {
    let cache_svc = CacheGrpc {
        coordinator: coordinator.clone(),
    };
    let peer_svc = PeerGrpc { coordinator };

    tonic::transport::Server::builder()
        .add_service(cachemesh_proto::cache::cache_service_server::CacheServiceServer::new(
            cache_svc,
        ))
        .add_service(cachemesh_proto::peer::peer_service_server::PeerServiceServer::new(peer_svc))
}
