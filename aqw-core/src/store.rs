//! Keyed in-memory store with per-key critical sections
//!
//! Each component owns one of these for its record family. The outer map
//! lock is held only long enough to look up or insert the entry; all real
//! work happens under the per-key mutex, so operations on different
//! tasks, annotators or conflicts never serialize against each other.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub(crate) struct KeyedStore<K, V> {
    inner: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Get the entry for `key`, creating a default one if absent
    pub async fn entry(&self, key: &K) -> Arc<Mutex<V>>
    where
        V: Default,
    {
        // Fast path: entry already exists
        {
            let map = self.inner.read().await;
            if let Some(entry) = map.get(key) {
                return Arc::clone(entry);
            }
        }

        let mut map = self.inner.write().await;
        Arc::clone(
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(V::default()))),
        )
    }

    /// Get the entry for `key` if one exists
    pub async fn get(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        let map = self.inner.read().await;
        map.get(key).map(Arc::clone)
    }

    /// Insert a new entry. Keys are internally minted UUIDs for the
    /// families using this path, so collisions do not occur.
    pub async fn insert(&self, key: K, value: V) -> Arc<Mutex<V>> {
        let entry = Arc::new(Mutex::new(value));
        let mut map = self.inner.write().await;
        map.insert(key, Arc::clone(&entry));
        entry
    }
}
