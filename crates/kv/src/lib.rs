//! cachemesh-kv: the per-request coordinator and its seams.
//!
//! The coordinator implements the cluster protocol (route to the key's
//! owner, write through the durable store, replicate best-effort, read
//! through the legacy source) against three traits so every collaborator
//! is swappable: `PeerClient` (node-to-node RPC), `DurableStore` (external
//! system of record) and `LegacySource` (cold-read fallback). Real
//! implementations live in the `net` and `bridge` crates; `testing` holds
//! in-memory fakes shared by unit and integration tests.

pub mod coordinator;
pub mod durable;
pub mod legacy;
pub mod peer_client;
pub mod testing;

pub use coordinator::{Coordinator, CoordinatorConfig, WriteOp};
pub use durable::{DurableError, DurableStore};
pub use legacy::LegacySource;
pub use peer_client::PeerClient;
