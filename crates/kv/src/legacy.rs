//! Contract for the legacy read-through source.

use async_trait::async_trait;

/// External cold-read fallback, consulted on an owner GET miss.
///
/// There is no error channel: implementations log transport failures and
/// report them as absent, so a flaky legacy system degrades to cache
/// misses instead of failing reads.
#[async_trait]
pub trait LegacySource: Send + Sync + 'static {
    async fn fetch(&self, key: &str) -> Option<Vec<u8>>;
}
