//! cachemesh-node: entry point for a cluster node.
//!
//! Loads config, builds the ring and the in-memory store, wires the
//! coordinator to the peer channel pool and the external adapters, then
//! serves both gRPC surfaces until SIGTERM or Ctrl-C. Any boot failure
//! (invalid membership, unreachable durable store, port bind) exits
//! non-zero; a drained shutdown exits zero.

use cachemesh_bridge::{HttpLegacySource, PostgresStore};
use cachemesh_kv::{Coordinator, CoordinatorConfig};
use cachemesh_net::{build_server, GrpcPeerClient};
use cachemesh_ring::Ring;
use cachemesh_store::MemoryStore;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cachemesh_metrics::init_tracing();

    // First CLI arg is an optional YAML config path; the environment
    // (NODE_ID, CACHE_PEERS, …) otherwise.
    let config = match std::env::args().nth(1) {
        Some(path) => cachemesh_config::load_from_file(std::path::Path::new(&path))?,
        None => cachemesh_config::ClusterConfig::from_env()?,
    };

    tracing::info!(
        node_id = %config.node_id,
        peers = ?config.peers,
        replication_n = config.replication_n,
        vnodes = config.vnodes,
        "booting cachemesh node"
    );

    let ring = Arc::new(Ring::build(&config.peers, config.vnodes)?);
    let store = Arc::new(MemoryStore::new());

    let timeouts = &config.timeouts;
    let peers = Arc::new(GrpcPeerClient::new(
        &config.peers,
        &config.node_id,
        Duration::from_millis(timeouts.connect_timeout_ms),
        Duration::from_millis(timeouts.rpc_timeout_ms),
    )?);

    // The durable store is the system of record; refusing to boot without
    // it beats acknowledging writes that cannot be persisted.
    let durable = PostgresStore::connect(&config.postgres_url).await?;
    durable.ensure_schema().await?;
    durable.ping().await?;
    let durable = Arc::new(durable);
    tracing::info!("durable store reachable");

    let legacy = Arc::new(HttpLegacySource::new(
        &config.legacy_api_url,
        Duration::from_millis(timeouts.legacy_timeout_ms),
    )?);

    let coordinator = Arc::new(Coordinator::new(
        config.node_id.clone(),
        ring,
        store,
        peers,
        durable,
        legacy,
        CoordinatorConfig {
            replication_n: config.replication_n,
            op_timeout: Duration::from_millis(timeouts.op_timeout_ms),
            replica_timeout: Duration::from_millis(timeouts.replica_timeout_ms),
            durable_timeout: Duration::from_millis(timeouts.durable_timeout_ms),
            max_value_bytes: config.max_value_bytes,
        },
    ));

    // Ops endpoint for probes and Prometheus scraping.
    let ops_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.ops_port).parse()?;
    tokio::spawn(async move {
        if let Err(e) = cachemesh_metrics::serve_ops(ops_addr).await {
            tracing::warn!("ops server failed: {}", e);
        }
    });

    let bind_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.node_id.port()).parse()?;
    let router = build_server(coordinator);

    tracing::info!("serving gRPC on {}", bind_addr);
    router
        .serve_with_shutdown(bind_addr, shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGTERM (orchestrated shutdown) or Ctrl-C (interactive).
/// tonic then stops accepting and drains in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler installs on unix");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received Ctrl+C, shutting down");
    }
}
