//! Embedded key-value store underneath the document store.
//!
//! The in-memory backend keeps everything in a BTreeMap. Guarded batches are
//! the only multi-key primitive: guards are checked and ops applied under a
//! single write lock, which is what makes unique indexes race-free.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::types::StoreError;

/// Key type for the KV store.
pub type Key = Vec<u8>;
/// Value type for the KV store.
pub type Value = Vec<u8>;
/// A key-value pair.
pub type KvPair = (Key, Value);

/// Key-value store trait for document persistence.
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key doesn't exist.
    fn get(&self, key: &[u8]) -> Result<Option<Value>, StoreError>;

    /// Put a key-value pair. Overwrites any existing value.
    fn put(&self, key: Key, value: Value) -> Result<(), StoreError>;

    /// Delete a key. Returns Ok(()) even if the key didn't exist.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Scan all keys with the given prefix, returning (key, value) pairs in sorted order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError>;

    /// Returns true if the key exists.
    fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Atomically checks every guard and, only if all hold, applies the ops.
    ///
    /// Returns `Ok(None)` when the batch was applied, or `Ok(Some(key))` with
    /// the key of the first guard that failed. Nothing is written on failure.
    fn write_guarded(&self, guards: &[Guard], ops: Vec<BatchOp>)
        -> Result<Option<Key>, StoreError>;

    /// Atomically write a batch of operations (puts and deletes).
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        self.write_guarded(&[], ops).map(|_| ())
    }
}

/// A single operation in a write batch.
#[derive(Clone, Debug)]
pub enum BatchOp {
    /// Put a key-value pair.
    Put {
        /// The key to insert or update.
        key: Vec<u8>,
        /// The value to store.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// The key to delete.
        key: Vec<u8>,
    },
}

/// Precondition checked before a guarded batch is applied.
#[derive(Clone, Debug)]
pub enum Guard {
    /// The key must not exist.
    Absent(Key),
    /// The key must exist and hold exactly this value.
    Equals(Key, Value),
}

impl Guard {
    fn key(&self) -> &[u8] {
        match self {
            Guard::Absent(key) | Guard::Equals(key, _) => key,
        }
    }

    /// Evaluates the guard against the current value of its key.
    pub(crate) fn holds(&self, current: Option<&Value>) -> bool {
        match self {
            Guard::Absent(_) => current.is_none(),
            Guard::Equals(_, expected) => current == Some(expected),
        }
    }
}

/// Returns the key of the first failing guard in `data`, if any.
pub(crate) fn first_failed_guard(
    data: &BTreeMap<Key, Value>,
    guards: &[Guard],
) -> Option<Key> {
    guards
        .iter()
        .find(|g| !g.holds(data.get(g.key())))
        .map(|g| g.key().to_vec())
}

pub(crate) fn apply_ops(data: &mut BTreeMap<Key, Value>, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                data.insert(key, value);
            }
            BatchOp::Delete { key } => {
                data.remove(&key);
            }
        }
    }
}

pub(crate) fn scan(data: &BTreeMap<Key, Value>, prefix: &[u8]) -> Vec<KvPair> {
    let mut result = Vec::new();
    for (k, v) in data.range::<Vec<u8>, _>(prefix.to_vec()..) {
        if !k.starts_with(prefix) {
            break;
        }
        result.push((k.clone(), v.clone()));
    }
    result
}

/// In-memory KV store backed by a BTreeMap. Thread-safe via RwLock.
///
/// Does not persist data across restarts; cloning shares the same map.
#[derive(Clone)]
pub struct MemoryKvStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// Creates a new empty in-memory KV store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        data.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        data.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        Ok(scan(&data, prefix))
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        Ok(data.contains_key(key))
    }

    fn write_guarded(
        &self,
        guards: &[Guard],
        ops: Vec<BatchOp>,
    ) -> Result<Option<Key>, StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::KvError(e.to_string()))?;
        if let Some(failed) = first_failed_guard(&data, guards) {
            return Ok(Some(failed));
        }
        apply_ops(&mut data, ops);
        Ok(None)
    }
}
