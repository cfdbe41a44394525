//! Mapping between `ClusterError` and transport-level statuses.
//!
//! The mapping is reversible so a forwarding node can hand its client the
//! owner's verdict unchanged: a `DATA_LOSS` from the owner is still a
//! durability failure two hops later.

use cachemesh_common::{ClusterError, NodeId};
use tonic::{Code, Status};

/// Server side: taxonomy → status. `NotFound` never becomes a status on
/// the wire — GET replies carry `found = false` instead.
pub fn status_from(err: ClusterError) -> Status {
    let message = err.to_string();
    match err {
        ClusterError::NotFound => Status::not_found(message),
        ClusterError::Unavailable(_) => Status::unavailable(message),
        ClusterError::Durability(_) => Status::data_loss(message),
        ClusterError::Invalid(_) => Status::invalid_argument(message),
        ClusterError::NotOwner { .. } => Status::failed_precondition(message),
    }
}

/// Client side: status → taxonomy, for calls to `peer`.
pub fn error_from(status: Status, peer: &NodeId) -> ClusterError {
    match status.code() {
        Code::NotFound => ClusterError::NotFound,
        Code::Unavailable | Code::DeadlineExceeded => {
            ClusterError::Unavailable(format!("peer {peer}: {}", status.message()))
        }
        Code::DataLoss => ClusterError::Durability(status.message().to_string()),
        Code::InvalidArgument => ClusterError::Invalid(status.message().to_string()),
        Code::FailedPrecondition => {
            // The receiver disowned the key: only a broken membership list
            // can cause this, surface it loudly.
            ClusterError::Invalid(format!("peer {peer} rejected forward: {}", status.message()))
        }
        _ => ClusterError::Unavailable(format!("peer {peer}: {}", status.message())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> NodeId {
        "peer:50051".parse().unwrap()
    }

    #[test]
    fn test_roundtrip_unavailable() {
        let status = status_from(ClusterError::Unavailable("down".into()));
        assert_eq!(status.code(), Code::Unavailable);
        assert!(matches!(
            error_from(status, &peer()),
            ClusterError::Unavailable(_)
        ));
    }

    #[test]
    fn test_roundtrip_durability() {
        let status = status_from(ClusterError::Durability("refused".into()));
        assert_eq!(status.code(), Code::DataLoss);
        assert!(matches!(
            error_from(status, &peer()),
            ClusterError::Durability(_)
        ));
    }

    #[test]
    fn test_roundtrip_invalid() {
        let status = status_from(ClusterError::Invalid("empty key".into()));
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(matches!(
            error_from(status, &peer()),
            ClusterError::Invalid(_)
        ));
    }

    #[test]
    fn test_not_owner_maps_to_failed_precondition() {
        let status = status_from(ClusterError::NotOwner {
            node: peer(),
            owner: "other:1".parse().unwrap(),
            key: "k".into(),
        });
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn test_unknown_code_degrades_to_unavailable() {
        let err = error_from(Status::internal("??"), &peer());
        assert!(matches!(err, ClusterError::Unavailable(_)));
    }
}
