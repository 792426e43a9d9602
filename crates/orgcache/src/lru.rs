//! Bounded LRU map
//!
//! Entries live in a slab of slots threaded on a doubly-linked recency list.
//! Freed slots are recycled through a free list, so get, put and remove are
//! O(1). Predicate removal scans the index once.

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;

struct Entry<K, V> {
    key: K,
    value: V,
    newer: Option<usize>,
    older: Option<usize>,
}

/// LRU map holding at most `capacity` entries
pub struct LruCache<K, V> {
    index: HashMap<K, usize, RandomState>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    newest: Option<usize>,
    oldest: Option<usize>,
    capacity: usize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Empty map; a capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            newest: None,
            oldest: None,
            capacity,
        }
    }

    /// Value for `key`, marking it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        self.slots[slot].as_ref().map(|entry| &entry.value)
    }

    /// Membership test that leaves recency untouched
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace `key`.
    ///
    /// Returns the least recently used entry if it had to make room.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.value = value;
            }
            self.promote(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.slots[slot] = Some(Entry {
            key: key.clone(),
            value,
            newer: None,
            older: None,
        });
        self.link_newest(slot);
        self.index.insert(key, slot);

        evicted
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.release(slot).map(|(_, value)| value)
    }

    /// Remove every entry whose key matches, returning how many went
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let doomed: Vec<usize> = self
            .index
            .iter()
            .filter(|(key, _)| pred(*key))
            .map(|(_, &slot)| slot)
            .collect();

        for &slot in &doomed {
            if let Some((key, _)) = self.release(slot) {
                self.index.remove(&key);
            }
        }
        doomed.len()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when there are no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.newest = None;
        self.oldest = None;
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let slot = self.oldest?;
        let (key, value) = self.release(slot)?;
        self.index.remove(&key);
        Some((key, value))
    }

    /// Unlink a slot, free it and hand back its contents
    fn release(&mut self, slot: usize) -> Option<(K, V)> {
        self.unlink(slot);
        let entry = self.slots[slot].take()?;
        self.free.push(slot);
        Some((entry.key, entry.value))
    }

    fn promote(&mut self, slot: usize) {
        if self.newest != Some(slot) {
            self.unlink(slot);
            self.link_newest(slot);
        }
    }

    fn link_newest(&mut self, slot: usize) {
        let previous = self.newest;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.newer = None;
            entry.older = previous;
        }
        match previous {
            Some(prev) => {
                if let Some(entry) = self.slots[prev].as_mut() {
                    entry.newer = Some(slot);
                }
            }
            None => self.oldest = Some(slot),
        }
        self.newest = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let Some((newer, older)) = self.slots[slot].as_ref().map(|e| (e.newer, e.older)) else {
            return;
        };

        match newer {
            Some(n) => {
                if let Some(entry) = self.slots[n].as_mut() {
                    entry.older = older;
                }
            }
            None => self.newest = older,
        }
        match older {
            Some(o) => {
                if let Some(entry) = self.slots[o].as_mut() {
                    entry.newer = newer;
                }
            }
            None => self.oldest = newer,
        }

        if let Some(entry) = self.slots[slot].as_mut() {
            entry.newer = None;
            entry.older = None;
        }
    }
}
