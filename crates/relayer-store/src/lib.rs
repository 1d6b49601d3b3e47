// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Relayer Store Module
//!
//! Fixed-capacity in-memory caches used for batch and data-result lookups.
//!
//! Eviction is insertion-order FIFO, *not* LRU: a frequently-read old entry
//! is still evicted before a rarely-read newer one. Reads never refresh
//! recency.

#![warn(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

/// A fixed-capacity key/value store with insertion-order FIFO eviction.
///
/// Single-threaded; wrap it in [`SharedBoundedCache`] to share across tasks.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    insertion_order: VecDeque<K>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty cache that holds at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            insertion_order: VecDeque::with_capacity(capacity),
        }
    }

    /// Inserts or overwrites `key`, evicting the oldest inserted key once
    /// the size exceeds the capacity.
    ///
    /// Overwriting an existing key keeps its original insertion position.
    pub fn set(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.insertion_order.push_back(key);
            if self.entries.len() > self.capacity {
                if let Some(oldest) = self.insertion_order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
    }

    /// Returns the value for `key` without refreshing its recency.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Removes `key` from the cache, returning its value if present.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.insertion_order.retain(|k| k != key);
        }
        removed
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The fixed capacity this cache was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A cheaply clonable, thread-safe wrapper around [`BoundedCache`].
#[derive(Debug)]
pub struct SharedBoundedCache<K, V>(Arc<RwLock<BoundedCache<K, V>>>);

impl<K, V> Clone for SharedBoundedCache<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K, V> SharedBoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty shared cache that holds at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(RwLock::new(BoundedCache::new(capacity))))
    }

    /// See [`BoundedCache::set`].
    pub fn set(&self, key: K, value: V) {
        self.0.write().set(key, value);
    }

    /// See [`BoundedCache::get`]. Returns a clone of the stored value.
    pub fn get(&self, key: &K) -> Option<V> {
        self.0.read().get(key).cloned()
    }

    /// See [`BoundedCache::delete`].
    pub fn delete(&self, key: &K) -> Option<V> {
        self.0.write().delete(key)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_the_first_inserted_key() {
        let mut cache = BoundedCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        // reads do not refresh recency
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.set("d", 4);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.get(&"d"), Some(&4));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn overwrite_keeps_insertion_position() {
        let mut cache = BoundedCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        cache.set("c", 3);
        // "a" is still the oldest insertion, so it goes first.
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn delete_removes_the_key() {
        let mut cache = BoundedCache::new(2);
        cache.set(1u64, "one");
        cache.set(2u64, "two");
        assert_eq!(cache.delete(&1), Some("one"));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 1);
        // deleting frees a slot, so no eviction on the next insert
        cache.set(3, "three");
        assert_eq!(cache.get(&2), Some(&"two"));
        assert_eq!(cache.get(&3), Some(&"three"));
    }

    #[test]
    fn shared_cache_is_clonable_across_threads() {
        let cache = SharedBoundedCache::new(2);
        let clone = cache.clone();
        std::thread::spawn(move || clone.set(1u64, 1u64))
            .join()
            .unwrap();
        assert_eq!(cache.get(&1), Some(1));
    }
}
