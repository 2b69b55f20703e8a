use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Thread-safe get-or-create map of shared resources keyed by id.
///
/// Components that need one object per external id get an explicit registry
/// injected instead of reaching for ambient global state; parent lookups are
/// plain map lookups that can fail explicitly.
pub struct ResourceRegistry<K, V> {
    inner: Mutex<HashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash + Clone, V> ResourceRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the resource registered under `key`, creating it with `init`
    /// if absent. `init` runs at most once per key while the lock is held.
    pub fn get_or_create(&self, key: &K, init: impl FnOnce() -> V) -> Arc<V> {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        Arc::clone(
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(init())),
        )
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, V> Default for ResourceRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
