//! Metrics and tracing setup for cachemesh.
//!
//! Provides a global [`NodeMetrics`] singleton backed by the `prometheus`
//! crate, plus a lightweight ops HTTP server exposing `/metrics` for
//! Prometheus scraping and `/healthz` / `/readyz` for liveness and
//! readiness probes.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static NodeMetrics {
    METRICS.get_or_init(NodeMetrics::new)
}

/// All Prometheus metrics for a cachemesh node.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── Client operations ──
    pub client_gets: IntCounter,
    pub client_sets: IntCounter,
    pub client_deletes: IntCounter,
    pub op_latency_secs: HistogramVec,

    // ── Routing ──
    pub forwards: IntCounterVec,

    // ── Peer RPCs ──
    pub peer_rpcs_sent: IntCounterVec,
    pub peer_rpcs_received: IntCounterVec,
    pub rpc_latency_secs: HistogramVec,

    // ── Replication ──
    pub replication_failures: IntCounter,
    pub replica_fallback_reads: IntCounter,

    // ── External bridges ──
    pub durable_errors: IntCounter,
    pub durable_loads: IntCounter,
    pub legacy_hits: IntCounter,
    pub legacy_misses: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for RPC/operation latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let client_gets = IntCounter::with_opts(Opts::new(
            "cachemesh_client_gets_total",
            "Client GET operations",
        ))
        .expect("client_gets counter");
        let client_sets = IntCounter::with_opts(Opts::new(
            "cachemesh_client_sets_total",
            "Client SET operations",
        ))
        .expect("client_sets counter");
        let client_deletes = IntCounter::with_opts(Opts::new(
            "cachemesh_client_deletes_total",
            "Client DELETE operations",
        ))
        .expect("client_deletes counter");

        let op_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "cachemesh_op_latency_seconds",
                "Client operation latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op"],
        )
        .expect("op_latency_secs histogram");

        let forwards = IntCounterVec::new(
            Opts::new(
                "cachemesh_forwards_total",
                "Client requests forwarded to the key's owner, by op",
            ),
            &["op"],
        )
        .expect("forwards counter vec");

        let peer_rpcs_sent = IntCounterVec::new(
            Opts::new(
                "cachemesh_peer_rpcs_sent_total",
                "Outbound peer RPCs, by type",
            ),
            &["rpc_type"],
        )
        .expect("peer_rpcs_sent counter vec");
        let peer_rpcs_received = IntCounterVec::new(
            Opts::new(
                "cachemesh_peer_rpcs_received_total",
                "Inbound peer RPCs, by type",
            ),
            &["rpc_type"],
        )
        .expect("peer_rpcs_received counter vec");

        let rpc_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "cachemesh_rpc_latency_seconds",
                "Peer RPC latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["rpc_type", "direction"],
        )
        .expect("rpc_latency_secs histogram");

        let replication_failures = IntCounter::with_opts(Opts::new(
            "cachemesh_replication_failures_total",
            "Replica writes that failed or timed out",
        ))
        .expect("replication_failures counter");
        let replica_fallback_reads = IntCounter::with_opts(Opts::new(
            "cachemesh_replica_fallback_reads_total",
            "Reads served from a local replica copy because the owner was unreachable",
        ))
        .expect("replica_fallback_reads counter");

        let durable_errors = IntCounter::with_opts(Opts::new(
            "cachemesh_durable_errors_total",
            "Durable store writes refused or timed out",
        ))
        .expect("durable_errors counter");
        let durable_loads = IntCounter::with_opts(Opts::new(
            "cachemesh_durable_loads_total",
            "Keys rehydrated from the durable store on read miss",
        ))
        .expect("durable_loads counter");

        let legacy_hits = IntCounter::with_opts(Opts::new(
            "cachemesh_legacy_hits_total",
            "Read-through fetches answered by the legacy source",
        ))
        .expect("legacy_hits counter");
        let legacy_misses = IntCounter::with_opts(Opts::new(
            "cachemesh_legacy_misses_total",
            "Read-through fetches the legacy source missed",
        ))
        .expect("legacy_misses counter");

        // Register all metrics
        registry
            .register(Box::new(client_gets.clone()))
            .expect("register client_gets");
        registry
            .register(Box::new(client_sets.clone()))
            .expect("register client_sets");
        registry
            .register(Box::new(client_deletes.clone()))
            .expect("register client_deletes");
        registry
            .register(Box::new(op_latency_secs.clone()))
            .expect("register op_latency_secs");
        registry
            .register(Box::new(forwards.clone()))
            .expect("register forwards");
        registry
            .register(Box::new(peer_rpcs_sent.clone()))
            .expect("register peer_rpcs_sent");
        registry
            .register(Box::new(peer_rpcs_received.clone()))
            .expect("register peer_rpcs_received");
        registry
            .register(Box::new(rpc_latency_secs.clone()))
            .expect("register rpc_latency_secs");
        registry
            .register(Box::new(replication_failures.clone()))
            .expect("register replication_failures");
        registry
            .register(Box::new(replica_fallback_reads.clone()))
            .expect("register replica_fallback_reads");
        registry
            .register(Box::new(durable_errors.clone()))
            .expect("register durable_errors");
        registry
            .register(Box::new(durable_loads.clone()))
            .expect("register durable_loads");
        registry
            .register(Box::new(legacy_hits.clone()))
            .expect("register legacy_hits");
        registry
            .register(Box::new(legacy_misses.clone()))
            .expect("register legacy_misses");

        Self {
            registry,
            client_gets,
            client_sets,
            client_deletes,
            op_latency_secs,
            forwards,
            peer_rpcs_sent,
            peer_rpcs_received,
            rpc_latency_secs,
            replication_failures,
            replica_fallback_reads,
            durable_errors,
            durable_loads,
            legacy_hits,
            legacy_misses,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start an RPC latency timer. Returns a guard that records
/// elapsed time on drop.
pub fn start_rpc_timer(rpc_type: &str, direction: &str) -> prometheus::HistogramTimer {
    metrics()
        .rpc_latency_secs
        .with_label_values(&[rpc_type, direction])
        .start_timer()
}

/// Helper: start a client operation latency timer.
pub fn start_op_timer(op: &str) -> prometheus::HistogramTimer {
    metrics()
        .op_latency_secs
        .with_label_values(&[op])
        .start_timer()
}

// ────────────────────────── Ops HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response")
}

async fn ops_handler(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let response = match req.uri().path() {
        "/metrics" => text_response(StatusCode::OK, encode_metrics()),
        // Liveness: the process is up and serving.
        "/healthz" => text_response(StatusCode::OK, "OK".to_string()),
        // Readiness: the node serves once booted; dependency probes can
        // be layered on here later.
        "/readyz" => text_response(StatusCode::OK, "OK".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "not found".to_string()),
    };
    Ok(response)
}

/// Serve `/metrics`, `/healthz` and `/readyz` on the given address.
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_ops(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("ops server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(ops_handler))
                .await
            {
                tracing::debug!("ops connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
