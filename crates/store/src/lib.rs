//! In-memory store for a single cachemesh node.
//!
//! One current value per key, no versions, no TTL, no eviction. Deleting a
//! key removes the mapping; absence is the tombstone. The store holds a
//! node's share of the cluster's data for its lifetime only; durability
//! lives in the external store, not here.

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe key-value map. Operations never suspend, so request tasks
/// can call into it from any point without holding an await across it.
///
/// Per-key ordering falls out of the write lock: for a single key, a get
/// observes either the latest applied set or absence after a delete.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read().get(key).cloned()
    }

    /// Insert or overwrite `key`.
    pub fn set(&self, key: String, value: Vec<u8>) {
        self.write().insert(key, value);
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Number of resident keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking writer cannot leave the map structurally broken (HashMap
    // ops are not observable mid-flight), so poison is safe to strip.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<u8>>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}
