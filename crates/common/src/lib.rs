//! cachemesh-common: shared types for the cachemesh cluster.
//!
//! Provides the `NodeId` identity type (a validated `host:port` string,
//! fixed at boot) and the `ClusterError` taxonomy every layer translates
//! its failures into.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// A node's stable identity: the `host:port` of its RPC endpoint.
///
/// Identity is assigned from configuration at startup and never changes for
/// the lifetime of the process. Every node derives the same ring from the
/// same ordered membership list of these.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// The endpoint string, `host:port`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The port component.
    pub fn port(&self) -> u16 {
        // Validated in `from_str`; the rsplit and parse cannot fail here.
        self.0
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for NodeId {
    type Err = InvalidNodeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidNodeId(s.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(InvalidNodeId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for NodeId {
    type Error = InvalidNodeId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> String {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A node identity that is not of the form `host:port`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid node id {0:?}: expected host:port")]
pub struct InvalidNodeId(pub String);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every failure a client-visible operation can end in.
///
/// The coordinator translates internal failures into one of these; the RPC
/// server maps each to a transport status. Replica failures are deliberately
/// absent: replication is best-effort and never fails the client call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    /// GET miss after the read-through chain also missed.
    #[error("key not found")]
    NotFound,

    /// The key's owner could not be reached. Retriable against another node.
    #[error("owner unavailable: {0}")]
    Unavailable(String),

    /// The durable store refused the write; the local store was not touched.
    #[error("durable store write failed: {0}")]
    Durability(String),

    /// Malformed request: empty key, oversize value.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// A peer RPC landed on a node that does not own the key. With a fixed
    /// ring this means the sender is misconfigured; fail fast, never
    /// re-forward.
    #[error("node {node} does not own key {key:?} (owner is {owner})")]
    NotOwner {
        node: NodeId,
        owner: NodeId,
        key: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
