//! Per-key async read/write locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// A lazily-populated map of one async `RwLock` per key.
///
/// Holders of different keys never contend. For one key, any number of
/// readers may hold it at once, and a writer excludes everyone. Tokio's
/// lock is fair, so a waiting writer is not starved by a stream of
/// readers. The outer map is behind a plain mutex that is never held
/// across an `.await`.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<RwLock<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for exclusive access to `key`.
    pub async fn write(&self, key: &K) -> OwnedRwLockWriteGuard<()> {
        self.slot(key).write_owned().await
    }

    /// Waits for shared access to `key`.
    pub async fn read(&self, key: &K) -> OwnedRwLockReadGuard<()> {
        self.slot(key).read_owned().await
    }

    /// Drops the slot for `key` once no one holds or awaits it.
    pub fn forget(&self, key: &K) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            map.remove(key);
        }
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &K) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(key.clone()).or_default())
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
