//! Integration tests: spin up multi-node clusters with real gRPC and drive
//! them through the client surface.
//!
//! All nodes share one in-memory durable fake — the same shape as
//! production, where every node writes through a single logical database.

use cachemesh_common::NodeId;
use cachemesh_kv::testing::{InMemoryDurableStore, StaticLegacySource};
use cachemesh_kv::{Coordinator, CoordinatorConfig};
use cachemesh_net::{build_server, GrpcPeerClient};
use cachemesh_proto::cache::cache_service_client::CacheServiceClient;
use cachemesh_proto::cache::{DeleteRequest, GetRequest, SetRequest};
use cachemesh_proto::peer::peer_service_client::PeerServiceClient;
use cachemesh_ring::Ring;
use cachemesh_store::MemoryStore;
use std::sync::Arc;
use tokio::time::Duration;
use tonic::transport::Channel;

type TestCoordinator = Coordinator<GrpcPeerClient, InMemoryDurableStore, StaticLegacySource>;

struct TestNode {
    id: NodeId,
    coordinator: Arc<TestCoordinator>,
    server: tokio::task::JoinHandle<()>,
}

struct TestCluster {
    nodes: Vec<TestNode>,
    ring: Arc<Ring>,
    durable: Arc<InMemoryDurableStore>,
    legacy: Arc<StaticLegacySource>,
}

impl TestCluster {
    /// Ports `base_port..base_port+size` must be free; each test uses its
    /// own block.
    async fn spawn(base_port: u16, size: usize, replication_n: usize) -> Self {
        let members: Vec<NodeId> = (0..size)
            .map(|i| {
                format!("127.0.0.1:{}", base_port + i as u16)
                    .parse()
                    .unwrap()
            })
            .collect();
        let ring = Arc::new(Ring::build(&members, 64).unwrap());
        let durable = Arc::new(InMemoryDurableStore::new());
        let legacy = Arc::new(StaticLegacySource::new());

        let mut nodes = Vec::new();
        for member in &members {
            let peers = Arc::new(
                GrpcPeerClient::new(
                    &members,
                    member,
                    Duration::from_millis(500),
                    // Well under the op deadline, so a dead owner leaves
                    // room for the replica fallback.
                    Duration::from_millis(500),
                )
                .unwrap(),
            );
            let coordinator = Arc::new(Coordinator::new(
                member.clone(),
                ring.clone(),
                Arc::new(MemoryStore::new()),
                peers,
                durable.clone(),
                legacy.clone(),
                CoordinatorConfig {
                    replication_n,
                    op_timeout: Duration::from_secs(2),
                    replica_timeout: Duration::from_millis(250),
                    durable_timeout: Duration::from_millis(500),
                    max_value_bytes: 4 * 1024 * 1024,
                },
            ));

            let router = build_server(coordinator.clone());
            let addr: std::net::SocketAddr = member.as_str().parse().unwrap();
            let server = tokio::spawn(async move {
                router.serve(addr).await.unwrap();
            });
            nodes.push(TestNode {
                id: member.clone(),
                coordinator,
                server,
            });
        }

        // Wait for the listeners to come up.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            nodes,
            ring,
            durable,
            legacy,
        }
    }

    async fn cache_client(&self, i: usize) -> CacheServiceClient<Channel> {
        CacheServiceClient::connect(format!("http://{}", self.nodes[i].id))
            .await
            .unwrap()
    }

    async fn peer_client(&self, i: usize) -> PeerServiceClient<Channel> {
        PeerServiceClient::connect(format!("http://{}", self.nodes[i].id))
            .await
            .unwrap()
    }

    fn owner_index(&self, key: &str) -> usize {
        let owner = self.ring.owner(key);
        self.nodes.iter().position(|n| n.id == owner).unwrap()
    }

    fn non_owner_index(&self, key: &str) -> usize {
        (self.owner_index(key) + 1) % self.nodes.len()
    }
}

async fn set(client: &mut CacheServiceClient<Channel>, key: &str, value: &[u8]) {
    let reply = client
        .set(SetRequest {
            key: key.to_string(),
            value: value.to_vec(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(reply.ok);
}

async fn get(client: &mut CacheServiceClient<Channel>, key: &str) -> Option<Vec<u8>> {
    let reply = client
        .get(GetRequest {
            key: key.to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    reply.found.then_some(reply.value)
}

#[tokio::test]
async fn test_set_replicates_to_every_node() {
    let cluster = TestCluster::spawn(18000, 3, 3).await;

    let mut client = cluster.cache_client(0).await;
    set(&mut client, "alpha", b"1").await;

    // With R = cluster size, the ack implies the owner applied and the
    // fan-out completed; every store must hold the value.
    for node in &cluster.nodes {
        assert_eq!(
            node.coordinator.store().get("alpha"),
            Some(b"1".to_vec()),
            "node {} is missing the replica",
            node.id
        );
    }
    assert_eq!(cluster.durable.row("alpha"), Some(b"1".to_vec()));
}

#[tokio::test]
async fn test_write_through_commits_before_ack() {
    let cluster = TestCluster::spawn(18010, 3, 3).await;

    let mut client = cluster.cache_client(0).await;
    set(&mut client, "durable", b"v").await;

    assert_eq!(cluster.durable.row("durable"), Some(b"v".to_vec()));
}

#[tokio::test]
async fn test_write_forwarded_to_owner() {
    let cluster = TestCluster::spawn(18020, 3, 1).await;

    let key = "forwarded-key";
    let owner = cluster.owner_index(key);
    let entry = cluster.non_owner_index(key);

    let mut client = cluster.cache_client(entry).await;
    set(&mut client, key, b"v").await;

    // R = 1: exactly the owner holds the value.
    for (i, node) in cluster.nodes.iter().enumerate() {
        let held = node.coordinator.store().get(key);
        if i == owner {
            assert_eq!(held, Some(b"v".to_vec()));
        } else {
            assert_eq!(held, None, "non-successor {} must not hold the key", node.id);
        }
    }

    // Reads routed through yet another node still find it.
    let other = (entry + 1) % 3;
    let mut reader = cluster.cache_client(other).await;
    assert_eq!(get(&mut reader, key).await, Some(b"v".to_vec()));
}

#[tokio::test]
async fn test_get_missing_returns_not_found() {
    let cluster = TestCluster::spawn(18030, 3, 3).await;

    let mut client = cluster.cache_client(1).await;
    assert_eq!(get(&mut client, "never-written").await, None);
}

#[tokio::test]
async fn test_read_through_legacy_then_cached() {
    let cluster = TestCluster::spawn(18040, 3, 3).await;
    cluster.legacy.insert("legacy-only", b"L".to_vec());

    let mut client = cluster.cache_client(0).await;
    assert_eq!(get(&mut client, "legacy-only").await, Some(b"L".to_vec()));
    assert_eq!(cluster.legacy.fetch_count(), 1);

    // Hydrated into the cluster: with the legacy source gone the key is
    // still served, from cache, through any node.
    cluster.legacy.set_enabled(false);
    let mut other = cluster.cache_client(2).await;
    assert_eq!(get(&mut other, "legacy-only").await, Some(b"L".to_vec()));
    assert_eq!(cluster.durable.row("legacy-only"), Some(b"L".to_vec()));
}

#[tokio::test]
async fn test_durability_failure_rejects_write() {
    let cluster = TestCluster::spawn(18050, 3, 3).await;
    cluster.durable.set_failing(true);

    let mut client = cluster.cache_client(0).await;
    let status = client
        .set(SetRequest {
            key: "x".to_string(),
            value: b"1".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::DataLoss);

    for node in &cluster.nodes {
        assert!(node.coordinator.store().is_empty());
    }

    // The durable store also answers the read path, so the miss is clean
    // once it recovers.
    cluster.durable.set_failing(false);
    assert_eq!(get(&mut client, "x").await, None);
}

#[tokio::test]
async fn test_mis_routed_internal_set_is_rejected() {
    let cluster = TestCluster::spawn(18060, 3, 3).await;

    let key = "mis-routed";
    let wrong = cluster.non_owner_index(key);

    let mut peer = cluster.peer_client(wrong).await;
    let status = peer
        .internal_set(SetRequest {
            key: key.to_string(),
            value: b"v".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    assert!(
        cluster.nodes[wrong].coordinator.store().is_empty(),
        "a rejected forward must not mutate state"
    );
}

#[tokio::test]
async fn test_delete_removes_everywhere() {
    let cluster = TestCluster::spawn(18070, 3, 3).await;

    let mut writer = cluster.cache_client(0).await;
    set(&mut writer, "doomed", b"v").await;

    let mut deleter = cluster.cache_client(1).await;
    let reply = deleter
        .delete(DeleteRequest {
            key: "doomed".to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert!(reply.ok);

    for node in &cluster.nodes {
        assert_eq!(node.coordinator.store().get("doomed"), None);
    }
    assert_eq!(cluster.durable.row("doomed"), None);

    let mut reader = cluster.cache_client(2).await;
    assert_eq!(get(&mut reader, "doomed").await, None);
}

#[tokio::test]
async fn test_owner_failure_served_by_surviving_replica() {
    let cluster = TestCluster::spawn(18080, 3, 3).await;

    let key = "beta";
    let mut client = cluster.cache_client(0).await;
    set(&mut client, key, b"2").await;

    // Kill the owner's server.
    let owner = cluster.owner_index(key);
    cluster.nodes[owner].server.abort();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A surviving node holds a replica and serves it when the forward to
    // the dead owner fails.
    let survivor = (owner + 1) % 3;
    let mut reader = cluster.cache_client(survivor).await;
    assert_eq!(get(&mut reader, key).await, Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_empty_key_is_invalid() {
    let cluster = TestCluster::spawn(18090, 1, 1).await;

    let mut client = cluster.cache_client(0).await;
    let status = client
        .set(SetRequest {
            key: String::new(),
            value: b"v".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let status = client
        .get(GetRequest { key: String::new() })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn test_same_routing_from_every_entry_point() {
    let cluster = TestCluster::spawn(18100, 3, 1).await;

    // Writes entering at different nodes for the same key land on the
    // same owner, so the last write wins cluster-wide.
    let key = "converge";
    for (i, value) in [b"v0", b"v1", b"v2"].iter().enumerate() {
        let mut client = cluster.cache_client(i).await;
        set(&mut client, key, *value).await;
    }

    for i in 0..3 {
        let mut client = cluster.cache_client(i).await;
        assert_eq!(get(&mut client, key).await, Some(b"v2".to_vec()));
    }
}
