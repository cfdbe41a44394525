//! Configuration schema and loaders for cachemesh nodes.
//!
//! The primary source is the process environment (`NODE_ID`, `CACHE_PEERS`,
//! `REPLICATION_N`, `POSTGRES_URL`, `LEGACY_API_URL`); YAML loading exists
//! for file-based deployments and tests. Membership is fixed at startup:
//! every node must be handed the same peer list, because the ring built
//! from it is the cluster's only agreement mechanism.

use cachemesh_common::NodeId;
use serde::{Deserialize, Serialize};

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// This node's identity, `host:port`. The RPC server binds the port.
    pub node_id: NodeId,

    /// Ordered membership list, including self.
    pub peers: Vec<NodeId>,

    /// Replication factor (owner + replicas).
    #[serde(default = "default_replication_n")]
    pub replication_n: usize,

    /// Virtual nodes per physical node on the hash ring.
    #[serde(default = "default_vnodes")]
    pub vnodes: usize,

    /// Durable store connection string.
    pub postgres_url: String,

    /// Legacy read-through source base URL.
    pub legacy_api_url: String,

    /// Port for the ops HTTP server (/metrics, /healthz, /readyz).
    #[serde(default = "default_ops_port")]
    pub ops_port: u16,

    /// Largest accepted value, in bytes.
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,

    /// Deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Overall bound on a client-facing operation.
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Per-replica bound on a replication RPC.
    #[serde(default = "default_replica_timeout_ms")]
    pub replica_timeout_ms: u64,

    /// Bound on a durable-store call.
    #[serde(default = "default_durable_timeout_ms")]
    pub durable_timeout_ms: u64,

    /// Bound on a legacy-source fetch.
    #[serde(default = "default_legacy_timeout_ms")]
    pub legacy_timeout_ms: u64,

    /// Bound on establishing a peer channel.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on a forwarded peer RPC. Must leave the overall operation
    /// deadline room to fall back or fail cleanly.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: default_op_timeout_ms(),
            replica_timeout_ms: default_replica_timeout_ms(),
            durable_timeout_ms: default_durable_timeout_ms(),
            legacy_timeout_ms: default_legacy_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

// --- Defaults ---

fn default_replication_n() -> usize {
    3
}
fn default_vnodes() -> usize {
    128
}
fn default_ops_port() -> u16 {
    8080
}
fn default_max_value_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_op_timeout_ms() -> u64 {
    2000
}
fn default_replica_timeout_ms() -> u64 {
    250
}
fn default_durable_timeout_ms() -> u64 {
    500
}
fn default_legacy_timeout_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_rpc_timeout_ms() -> u64 {
    1500
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
    #[error("environment variable {var}: {reason}")]
    BadEnv { var: &'static str, reason: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ClusterConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::Invalid("peers must not be empty".into()));
        }
        if !self.peers.contains(&self.node_id) {
            return Err(ConfigError::Invalid(format!(
                "node_id {} must appear in peers",
                self.node_id
            )));
        }
        if self.replication_n == 0 {
            return Err(ConfigError::Invalid("replication_n must be > 0".into()));
        }
        if self.replication_n > self.peers.len() {
            return Err(ConfigError::Invalid(format!(
                "replication_n ({}) must not exceed cluster size ({})",
                self.replication_n,
                self.peers.len()
            )));
        }
        if self.vnodes == 0 {
            return Err(ConfigError::Invalid("vnodes must be > 0".into()));
        }
        if self.max_value_bytes == 0 {
            return Err(ConfigError::Invalid("max_value_bytes must be > 0".into()));
        }
        if self.postgres_url.is_empty() {
            return Err(ConfigError::Invalid("postgres_url must not be empty".into()));
        }
        if self.legacy_api_url.is_empty() {
            return Err(ConfigError::Invalid(
                "legacy_api_url must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Load from the process environment.
    ///
    /// `NODE_ID`, `CACHE_PEERS` (comma-separated `host:port` list including
    /// self), `POSTGRES_URL` and `LEGACY_API_URL` are required;
    /// `REPLICATION_N` and `OPS_PORT` override their defaults. The
    /// remaining knobs keep their defaults and are reachable via YAML.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_id = required_env("NODE_ID")?
            .parse()
            .map_err(|e: cachemesh_common::InvalidNodeId| ConfigError::BadEnv {
                var: "NODE_ID",
                reason: e.to_string(),
            })?;

        let peers_raw = required_env("CACHE_PEERS")?;
        let peers = peers_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse().map_err(|e: cachemesh_common::InvalidNodeId| {
                    ConfigError::BadEnv {
                        var: "CACHE_PEERS",
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<NodeId>, _>>()?;

        let replication_n = match std::env::var("REPLICATION_N") {
            Ok(v) => v.parse().map_err(|_| ConfigError::BadEnv {
                var: "REPLICATION_N",
                reason: format!("{v:?} is not a number"),
            })?,
            Err(_) => default_replication_n(),
        };

        let ops_port = match std::env::var("OPS_PORT") {
            Ok(v) => v.parse().map_err(|_| ConfigError::BadEnv {
                var: "OPS_PORT",
                reason: format!("{v:?} is not a port"),
            })?,
            Err(_) => default_ops_port(),
        };

        let config = Self {
            node_id,
            peers,
            replication_n,
            vnodes: default_vnodes(),
            postgres_url: required_env("POSTGRES_URL")?,
            legacy_api_url: required_env("LEGACY_API_URL")?,
            ops_port,
            max_value_bytes: default_max_value_bytes(),
            timeouts: TimeoutConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn required_env(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingEnv(var))
}

/// Load a `ClusterConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<ClusterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `ClusterConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<ClusterConfig, ConfigError> {
    let config: ClusterConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
