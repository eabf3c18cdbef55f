//! Concurrent insertion-ordered key/value store.
//!
//! `OrderedMap` keeps O(1) store/get/delete by tracking each key's position
//! in the insertion sequence and deleting with swap-and-pop: the last key is
//! moved into the deleted slot, so surviving keys keep their relative order
//! among themselves while deletion stays constant time.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;
use thiserror::Error;

/// Errors returned by [`OrderedMap`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,
}

/// Internal state guarded by a single lock.
///
/// Invariants, held after every operation:
/// - a key is present in `items` iff it is present in `order` and `index`
/// - `order[index[k]] == k` for every key `k`
/// - `items.len() == order.len() == index.len()`
#[derive(Debug)]
struct MapInner<K, V> {
    items: HashMap<K, V>,
    order: Vec<K>,
    index: HashMap<K, usize>,
}

/// A map that preserves insertion order under concurrent access.
///
/// Readers (`get`, `get_all`, `len`) take a shared lock and do not block each
/// other; writers (`store`, `delete`) are serialized.
#[derive(Debug)]
pub struct OrderedMap<K, V> {
    inner: RwLock<MapInner<K, V>>,
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(MapInner {
                items: HashMap::with_capacity(capacity),
                order: Vec::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
            }),
        }
    }

    /// Stores a key/value pair. A new key is appended to the insertion
    /// order; overwriting an existing key does not reorder it.
    pub fn store(&self, key: K, value: V) {
        let mut inner = self.inner.write();
        Self::store_locked(&mut inner, key, value);
    }

    /// Stores multiple pairs under one write lock.
    pub fn store_pairs<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut inner = self.inner.write();
        for (key, value) in pairs {
            Self::store_locked(&mut inner, key, value);
        }
    }

    fn store_locked(inner: &mut MapInner<K, V>, key: K, value: V) {
        if !inner.items.contains_key(&key) {
            inner.order.push(key.clone());
            inner.index.insert(key.clone(), inner.order.len() - 1);
        }
        inner.items.insert(key, value);
    }

    /// Removes a key with swap-and-pop: the last key in the insertion order
    /// takes the deleted key's slot and the order vector shrinks by one.
    pub fn delete(&self, key: &K) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        if inner.items.remove(key).is_none() {
            return Err(StoreError::KeyNotFound);
        }

        let slot = inner
            .index
            .remove(key)
            .expect("index entry exists for every stored key");
        let last = inner.order.len() - 1;
        if slot != last {
            let moved = inner.order[last].clone();
            inner.order[slot] = moved.clone();
            inner.index.insert(moved, slot);
        }
        inner.order.truncate(last);

        Ok(())
    }

    pub fn get(&self, key: &K) -> Result<V, StoreError> {
        let inner = self.inner.read();
        inner.items.get(key).cloned().ok_or(StoreError::KeyNotFound)
    }

    /// Snapshot of all pairs in insertion order, materialized under the read
    /// lock so callers never observe a partial mutation.
    pub fn get_all(&self) -> Vec<(K, V)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .map(|key| {
                let value = inner
                    .items
                    .get(key)
                    .expect("ordered key always has a value")
                    .clone();
                (key.clone(), value)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }
}

impl<K, V> Default for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn assert_invariants(map: &OrderedMap<String, String>) {
        let inner = map.inner.read();
        assert_eq!(inner.items.len(), inner.order.len());
        assert_eq!(inner.items.len(), inner.index.len());
        for (key, slot) in &inner.index {
            assert_eq!(&inner.order[*slot], key);
            assert!(inner.items.contains_key(key));
        }
    }

    #[test]
    fn store_get_and_overwrite() {
        let map = OrderedMap::new();
        map.store("key1".to_string(), "value1".to_string());
        map.store("key2".to_string(), "value2".to_string());
        map.store("key3".to_string(), "value3".to_string());

        assert_eq!(map.get(&"key1".to_string()), Ok("value1".to_string()));
        assert_eq!(map.get(&"key2".to_string()), Ok("value2".to_string()));
        assert_eq!(map.get(&"key3".to_string()), Ok("value3".to_string()));

        map.store("key1".to_string(), "newValue1".to_string());
        assert_eq!(map.get(&"key1".to_string()), Ok("newValue1".to_string()));

        // Overwrite must not move the key or grow the map.
        assert_eq!(map.len(), 3);
        assert_eq!(map.get_all()[0].0, "key1");
        assert_invariants(&map);
    }

    #[test]
    fn get_missing_key() {
        let map: OrderedMap<String, String> = OrderedMap::new();
        assert_eq!(
            map.get(&"missing".to_string()),
            Err(StoreError::KeyNotFound)
        );
    }

    #[test]
    fn delete_swaps_last_key_into_hole() {
        let map = OrderedMap::new();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
            map.store(k.to_string(), v.to_string());
        }

        map.delete(&"b".to_string()).unwrap();

        // "d" takes b's slot; the snapshot is a,d,c.
        let keys: Vec<String> = map.get_all().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "d", "c"]);
        assert_eq!(map.get(&"b".to_string()), Err(StoreError::KeyNotFound));
        assert_invariants(&map);
    }

    #[test]
    fn delete_last_key_needs_no_swap() {
        let map = OrderedMap::new();
        map.store("a".to_string(), "1".to_string());
        map.store("b".to_string(), "2".to_string());

        map.delete(&"b".to_string()).unwrap();

        let keys: Vec<String> = map.get_all().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a"]);
        assert_invariants(&map);
    }

    #[test]
    fn delete_missing_key() {
        let map = OrderedMap::new();
        map.store("a".to_string(), "1".to_string());
        assert_eq!(
            map.delete(&"missing".to_string()),
            Err(StoreError::KeyNotFound)
        );
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn surviving_keys_after_delete() {
        let map = OrderedMap::new();
        map.store("a".to_string(), "1".to_string());
        map.store("b".to_string(), "2".to_string());
        map.store("c".to_string(), "3".to_string());

        map.delete(&"b".to_string()).unwrap();

        // Order after swap-and-pop is an implementation detail; the set of
        // survivors is not.
        let keys: HashSet<String> = map.get_all().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, HashSet::from(["a".to_string(), "c".to_string()]));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn store_pairs_preserves_order() {
        let map = OrderedMap::new();
        map.store_pairs([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);

        assert_eq!(
            map.get_all(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]
        );
        assert_invariants(&map);
    }

    #[test]
    fn concurrent_writers_keep_invariants() {
        let map = Arc::new(OrderedMap::new());
        let mut handles = Vec::new();

        for worker in 0..4 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("key{}", worker * 250 + i);
                    map.store(key.clone(), format!("value{i}"));
                    if i % 3 == 0 {
                        let _ = map.delete(&key);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_invariants(&map);
        let snapshot = map.get_all();
        assert_eq!(snapshot.len(), map.len());
    }
}
