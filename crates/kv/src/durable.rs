//! Contract for the external durable store.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    #[error("durable store error: {0}")]
    Backend(String),
}

/// The external system of record, shared by every node in the cluster.
///
/// Invoked on the owner only: `put`/`delete` synchronously in the write
/// path (a failure refuses the client write), `get` as the first fallback
/// of the read-through chain. The coordinator bounds every call with a
/// deadline.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), DurableError>;

    async fn delete(&self, key: &str) -> Result<(), DurableError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableError>;
}
