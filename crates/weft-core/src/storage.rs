//! Persistent key-value storage boundary
//!
//! The fabric table and group data provider persist through this trait; the
//! backing implementation (flash KVS, file, test memory) is injected at
//! server construction. Key derivation on top of this interface must be
//! stable across restarts so previously committed state reloads identically.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::WeftResult;

/// Abstract key-value storage delegate.
///
/// Valid for the duration of the server's active lifetime; the server never
/// takes ownership of the backing store.
pub trait StorageDelegate: Send + Sync {
    /// Fetch the value stored under `key`, if any
    fn get(&self, key: &str) -> WeftResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &[u8]) -> WeftResult<()>;

    /// Delete the value under `key`; deleting an absent key is a no-op
    fn delete(&self, key: &str) -> WeftResult<()>;

    /// List all keys beginning with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> WeftResult<Vec<String>>;
}

/// In-memory storage delegate used by tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StorageDelegate for MemoryStorage {
    fn get(&self, key: &str) -> WeftResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> WeftResult<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> WeftResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> WeftResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
