//! Generated gRPC code for the cachemesh protobuf definitions.

/// Client surface (Get, Set, Delete).
pub mod cache {
    tonic::include_proto!("cachemesh.cache");
}

/// Peer surface (InternalGet, InternalSet, InternalDelete, Replicate).
pub mod peer {
    tonic::include_proto!("cachemesh.peer");
}
