//! In-memory fakes for the external collaborators.
//!
//! Compiled into the library (not `#[cfg(test)]`) so integration tests in
//! other crates can build clusters without a live Postgres or legacy
//! endpoint. A single shared `InMemoryDurableStore` stands in for the one
//! logical database every node writes through.

use crate::durable::{DurableError, DurableStore};
use crate::legacy::LegacySource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Duration;

// ---------------------------------------------------------------------------
// Durable store fake
// ---------------------------------------------------------------------------

/// In-memory stand-in for the shared transactional store. Failure and
/// latency are injectable per test.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    rows: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    puts: AtomicUsize,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as if the database were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every subsequent call, for deadline tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Seed a row directly, bypassing the adapter contract.
    pub fn insert_row(&self, key: &str, value: Vec<u8>) {
        self.rows.lock().unwrap().insert(key.to_string(), value);
    }

    /// Direct row lookup for assertions.
    pub fn row(&self, key: &str) -> Option<Vec<u8>> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().unwrap().is_empty()
    }

    /// Number of `put` calls that reached the store.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), DurableError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DurableError::Backend("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), DurableError> {
        self.gate().await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DurableError> {
        self.gate().await?;
        self.rows.lock().unwrap().remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableError> {
        self.gate().await?;
        Ok(self.rows.lock().unwrap().get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// Legacy source fake
// ---------------------------------------------------------------------------

/// Fixed key-value table behind the legacy contract. Disabling it models
/// the legacy system going away after migration.
#[derive(Debug)]
pub struct StaticLegacySource {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    enabled: AtomicBool,
    fetches: AtomicUsize,
}

impl Default for StaticLegacySource {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl StaticLegacySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: Vec<u8>) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Number of fetches that reached the source.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegacySource for StaticLegacySource {
    async fn fetch(&self, key: &str) -> Option<Vec<u8>> {
        if !self.enabled.load(Ordering::SeqCst) {
            return None;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().get(key).cloned()
    }
}
