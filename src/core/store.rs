use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use crate::core::sync_lock;

/// Process-wide keyed store for per-entity runtime state (launch phase,
/// play time, ...).
///
/// Entries live until they are explicitly evicted; callers evict when the
/// underlying entity is deleted.
#[derive(Debug)]
pub struct KeyedStore<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, V>> {
        sync_lock(&self.entries)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.entries().insert(key, value)
    }

    pub fn evict(&self, key: &K) -> Option<V> {
        self.entries().remove(key)
    }

    /// Atomically read-modify-write one entry, starting from `V::default()`
    /// when absent.
    pub fn update<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> R
    where
        V: Default,
    {
        let mut entries = self.entries();
        f(entries.entry(key).or_default())
    }

    /// Set `value` only if `guard` accepts the current entry (or its absence).
    /// Returns whether the value was written.
    pub fn replace_if(&self, key: K, guard: impl FnOnce(Option<&V>) -> bool, value: V) -> bool {
        let mut entries = self.entries();
        if guard(entries.get(&key)) {
            entries.insert(key, value);
            true
        } else {
            false
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
