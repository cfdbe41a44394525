//! Request coordinator: routes client GET/SET/DELETE to the key's owner,
//! writes through the durable store, replicates best-effort, reads through
//! the legacy source.
//!
//! The coordinator runs on every node. For a client call it either serves
//! as owner or forwards once to the owner — never further, because every
//! node derives the same ring. Owner writes go durable-store-first: the
//! external store is the system of record, so a refused durable write
//! aborts the call before the local store is touched. Replication to the
//! remaining successors is fanned out in parallel, each RPC with its own
//! deadline; failures are logged and counted, never surfaced to the client.

use crate::durable::DurableStore;
use crate::legacy::LegacySource;
use crate::peer_client::PeerClient;
use cachemesh_common::{ClusterError, NodeId};
use cachemesh_ring::Ring;
use cachemesh_store::MemoryStore;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// A mutation travelling through the write path and over the replication
/// wire. Deletion carries no value; absence of the key is the tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set(Vec<u8>),
    Delete,
}

impl WriteOp {
    fn kind(&self) -> &'static str {
        match self {
            WriteOp::Set(_) => "set",
            WriteOp::Delete => "delete",
        }
    }
}

/// Tuning knobs, all fixed at boot from `ClusterConfig`.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Replication factor (owner + replicas).
    pub replication_n: usize,
    /// Overall bound on a client-facing operation.
    pub op_timeout: Duration,
    /// Per-replica bound on a replication RPC.
    pub replica_timeout: Duration,
    /// Bound on each durable-store call.
    pub durable_timeout: Duration,
    /// Largest accepted value, in bytes.
    pub max_value_bytes: usize,
}

/// Per-request orchestrator.
///
/// Generic over its collaborators for testability — deployment uses
/// `GrpcPeerClient` / `PostgresStore` / `HttpLegacySource`; tests use the
/// fakes in [`crate::testing`].
pub struct Coordinator<P: PeerClient, D: DurableStore, L: LegacySource> {
    node_id: NodeId,
    ring: Arc<Ring>,
    store: Arc<MemoryStore>,
    peers: Arc<P>,
    durable: Arc<D>,
    legacy: Arc<L>,
    config: CoordinatorConfig,
}

impl<P: PeerClient, D: DurableStore, L: LegacySource> std::fmt::Debug for Coordinator<P, D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: PeerClient, D: DurableStore, L: LegacySource> Coordinator<P, D, L> {
    pub fn new(
        node_id: NodeId,
        ring: Arc<Ring>,
        store: Arc<MemoryStore>,
        peers: Arc<P>,
        durable: Arc<D>,
        legacy: Arc<L>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            node_id,
            ring,
            store,
            peers,
            durable,
            legacy,
            config,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }

    /// This node's local store (read by the ops surface and tests).
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Client surface
    // -----------------------------------------------------------------------

    /// Client GET: serve as owner or forward once to the owner.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ClusterError> {
        validate_key(key)?;
        self.bounded(self.route_get(key)).await
    }

    /// Client SET. Acknowledged only after the durable store committed.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ClusterError> {
        validate_key(key)?;
        self.validate_value(&value)?;
        self.bounded(self.route_write(key, WriteOp::Set(value))).await
    }

    /// Client DELETE. Removing an absent key succeeds.
    pub async fn delete(&self, key: &str) -> Result<(), ClusterError> {
        validate_key(key)?;
        self.bounded(self.route_write(key, WriteOp::Delete)).await
    }

    // -----------------------------------------------------------------------
    // Peer surface
    // -----------------------------------------------------------------------

    /// Forwarded GET arriving from a peer. Must land on the owner: with a
    /// fixed ring a mis-route means the sender is broken, so fail fast
    /// instead of forwarding again.
    pub async fn internal_get(&self, key: &str) -> Result<Vec<u8>, ClusterError> {
        validate_key(key)?;
        self.check_owner(key)?;
        self.owner_get(key).await
    }

    /// Forwarded SET arriving from a peer.
    pub async fn internal_set(&self, key: &str, value: Vec<u8>) -> Result<(), ClusterError> {
        validate_key(key)?;
        self.validate_value(&value)?;
        self.check_owner(key)?;
        self.owner_write(key, WriteOp::Set(value), true).await
    }

    /// Forwarded DELETE arriving from a peer.
    pub async fn internal_delete(&self, key: &str) -> Result<(), ClusterError> {
        validate_key(key)?;
        self.check_owner(key)?;
        self.owner_write(key, WriteOp::Delete, true).await
    }

    /// Replication arriving from the owner: mutate the local store only.
    /// The durable store was already written by the owner.
    pub fn apply_replication(&self, key: &str, op: WriteOp) -> Result<(), ClusterError> {
        validate_key(key)?;
        match op {
            WriteOp::Set(value) => self.store.set(key.to_string(), value),
            WriteOp::Delete => {
                self.store.delete(key);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    async fn route_get(&self, key: &str) -> Result<Vec<u8>, ClusterError> {
        let owner = self.ring.owner(key);
        if owner == self.node_id {
            return self.owner_get(key).await;
        }

        tracing::debug!(key, %owner, "forwarding GET to owner");
        cachemesh_metrics::metrics()
            .forwards
            .with_label_values(&["get"])
            .inc();
        match self.peers.forward_get(&owner, key).await {
            Err(ClusterError::Unavailable(reason)) => {
                // Owner down. If this node is a replica holding the key,
                // serve its copy — it may lag the last acknowledged write,
                // which the protocol tolerates after owner failure.
                if let Some(value) = self.store.get(key) {
                    cachemesh_metrics::metrics().replica_fallback_reads.inc();
                    tracing::warn!(key, %owner, %reason, "owner unreachable, serving local replica copy");
                    return Ok(value);
                }
                Err(ClusterError::Unavailable(reason))
            }
            other => other,
        }
    }

    async fn route_write(&self, key: &str, op: WriteOp) -> Result<(), ClusterError> {
        let owner = self.ring.owner(key);
        if owner != self.node_id {
            tracing::debug!(key, %owner, op = op.kind(), "forwarding write to owner");
            cachemesh_metrics::metrics()
                .forwards
                .with_label_values(&[op.kind()])
                .inc();
            return match op {
                WriteOp::Set(value) => self.peers.forward_set(&owner, key, value).await,
                WriteOp::Delete => self.peers.forward_delete(&owner, key).await,
            };
        }
        self.owner_write(key, op, true).await
    }

    // -----------------------------------------------------------------------
    // Owner read path
    // -----------------------------------------------------------------------

    /// Local store, then the durable store, then the legacy source. A hit
    /// from either external source is written back through the owner write
    /// path so the cluster is hydrated before the client sees the value.
    async fn owner_get(&self, key: &str) -> Result<Vec<u8>, ClusterError> {
        if let Some(value) = self.store.get(key) {
            return Ok(value);
        }

        // The durable store may hold keys this node never saw (e.g. after
        // a restart wiped the in-memory store). Errors here degrade to a
        // miss: the read path must not fail on a flaky system of record.
        match timeout(self.config.durable_timeout, self.durable.get(key)).await {
            Ok(Ok(Some(value))) => {
                cachemesh_metrics::metrics().durable_loads.inc();
                tracing::debug!(key, "rehydrating from durable store");
                // Already committed durably; skip the redundant upsert.
                self.owner_write(key, WriteOp::Set(value.clone()), false)
                    .await?;
                return Ok(value);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "durable read failed, treating as miss")
            }
            Err(_) => {
                tracing::warn!(key, "durable read timed out, treating as miss")
            }
        }

        let m = cachemesh_metrics::metrics();
        match self.legacy.fetch(key).await {
            Some(value) => {
                m.legacy_hits.inc();
                tracing::debug!(key, bytes = value.len(), "hydrating from legacy source");
                self.owner_write(key, WriteOp::Set(value.clone()), true)
                    .await?;
                Ok(value)
            }
            None => {
                m.legacy_misses.inc();
                Err(ClusterError::NotFound)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Owner write path
    // -----------------------------------------------------------------------

    /// Durable store first, local store second, replica fan-out last.
    /// `write_durable` is false only when the value just came out of the
    /// durable store itself.
    async fn owner_write(
        &self,
        key: &str,
        op: WriteOp,
        write_durable: bool,
    ) -> Result<(), ClusterError> {
        if write_durable {
            self.write_durable(key, &op).await?;
        }

        match &op {
            WriteOp::Set(value) => self.store.set(key.to_string(), value.clone()),
            WriteOp::Delete => {
                self.store.delete(key);
            }
        }

        self.fan_out(key, &op).await;
        Ok(())
    }

    async fn write_durable(&self, key: &str, op: &WriteOp) -> Result<(), ClusterError> {
        let call = async {
            match op {
                WriteOp::Set(value) => self.durable.put(key, value).await,
                WriteOp::Delete => self.durable.delete(key).await,
            }
        };
        let outcome = match timeout(self.config.durable_timeout, call).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "deadline exceeded".to_string(),
        };
        cachemesh_metrics::metrics().durable_errors.inc();
        tracing::error!(key, op = op.kind(), error = %outcome, "durable write refused, aborting");
        Err(ClusterError::Durability(outcome))
    }

    /// Replicate to every other successor in parallel, each RPC bounded by
    /// its own deadline. Failures are collected and logged; the client call
    /// already succeeded once the owner and the durable store applied.
    async fn fan_out(&self, key: &str, op: &WriteOp) {
        let successors = self.ring.successors(key, self.config.replication_n);

        let mut futs = FuturesUnordered::new();
        for replica in successors {
            if replica == self.node_id {
                continue;
            }
            let peers = self.peers.clone();
            let key = key.to_string();
            let op = op.clone();
            let deadline = self.config.replica_timeout;
            futs.push(async move {
                let result = match timeout(deadline, peers.replicate(&replica, &key, &op)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("replication deadline exceeded".to_string()),
                };
                (replica, result)
            });
        }

        while let Some((replica, result)) = futs.next().await {
            if let Err(reason) = result {
                cachemesh_metrics::metrics().replication_failures.inc();
                tracing::warn!(key, %replica, %reason, "replica write failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, ClusterError> {
        match timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Unavailable(
                "operation deadline exceeded".to_string(),
            )),
        }
    }

    fn check_owner(&self, key: &str) -> Result<(), ClusterError> {
        let owner = self.ring.owner(key);
        if owner != self.node_id {
            return Err(ClusterError::NotOwner {
                node: self.node_id.clone(),
                owner,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn validate_value(&self, value: &[u8]) -> Result<(), ClusterError> {
        if value.len() > self.config.max_value_bytes {
            return Err(ClusterError::Invalid(format!(
                "value of {} bytes exceeds limit of {}",
                value.len(),
                self.config.max_value_bytes
            )));
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), ClusterError> {
    if key.is_empty() {
        return Err(ClusterError::Invalid("empty key".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
