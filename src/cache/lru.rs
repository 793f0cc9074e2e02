//! LRU Cache - Byte-Budgeted Eviction Cache
//!
//! Least-recently-used cache bounded by the total size of its keys and values.
//!
//! # Design
//!
//! ```text
//!   index: HashMap<String, usize> ──► nodes: Vec<Node>
//!
//!   head ──► [A] ◄──► [B] ◄──► [C] ◄── tail
//!   (MRU)                          (LRU)
//! ```
//!
//! - Nodes live in a `Vec` and link to each other by position
//! - Removal uses `swap_remove` and re-points the moved node, so the
//!   arena stays dense and every index entry names exactly one node
//! - `get` and `add` are O(1) amortized
//!
//! Not thread safe on its own; [`super::SyncCache`] serializes access.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

/// A value that can report how many bytes it occupies.
pub trait CacheValue {
    /// Size of the value in bytes
    fn size(&self) -> usize;
}

impl CacheValue for String {
    fn size(&self) -> usize {
        self.len()
    }
}

impl CacheValue for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl CacheValue for Bytes {
    fn size(&self) -> usize {
        self.len()
    }
}

/// Called with each entry evicted for exceeding the byte budget.
pub type EvictionCallback<V> = Box<dyn FnMut(&str, &V) + Send>;

struct Node<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Byte-budgeted LRU cache.
pub struct LruCache<V> {
    /// Maximum bytes (0 = unbounded)
    max_bytes: u64,
    /// Sum of key + value sizes currently held
    used_bytes: u64,
    nodes: Vec<Node<V>>,
    index: HashMap<String, usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    on_evicted: Option<EvictionCallback<V>>,
}

impl<V: CacheValue> LruCache<V> {
    /// Create a cache holding at most `max_bytes` (0 disables eviction)
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            nodes: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            on_evicted: None,
        }
    }

    /// Create a cache that reports evictions to `callback`
    pub fn with_eviction_callback(
        max_bytes: u64,
        callback: impl FnMut(&str, &V) + Send + 'static,
    ) -> Self {
        let mut cache = Self::new(max_bytes);
        cache.on_evicted = Some(Box::new(callback));
        cache
    }

    /// Look up a key, promoting it to most recently used
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        Some(&self.nodes[idx].value)
    }

    /// Look up a key without touching recency
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.nodes[idx].value)
    }

    /// Check if a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace a value, then evict until back under budget.
    ///
    /// A value larger than the whole budget is inserted and then evicted by
    /// the same pass.
    pub fn add(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();

        if let Some(&idx) = self.index.get(&key) {
            self.move_to_front(idx);
            let new_size = value.size() as u64;
            let old = std::mem::replace(&mut self.nodes[idx].value, value);
            self.used_bytes = self.used_bytes - old.size() as u64 + new_size;
        } else {
            self.used_bytes += entry_size(&key, &value);
            let idx = self.nodes.len();
            self.nodes.push(Node {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.index.insert(key, idx);
            self.push_front(idx);
        }

        while self.max_bytes != 0 && self.used_bytes > self.max_bytes {
            if self.remove_oldest().is_none() {
                break;
            }
        }
    }

    /// Evict the least recently used entry, notifying the eviction callback
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        let idx = self.tail?;
        let (key, value) = self.take(idx);
        if let Some(callback) = self.on_evicted.as_mut() {
            callback(&key, &value);
        }
        Some((key, value))
    }

    /// Remove a key explicitly. The eviction callback is not invoked.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = *self.index.get(key)?;
        Some(self.take(idx).1)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tracked size of all keys and values in bytes
    pub fn bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Byte budget (0 = unbounded)
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            keys.push(self.nodes[idx].key.as_str());
            cursor = self.nodes[idx].next;
        }
        keys
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;
        match self.head {
            Some(head) => self.nodes[head].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    /// Unlink and remove the node at `idx`, keeping the arena dense.
    fn take(&mut self, idx: usize) -> (String, V) {
        self.detach(idx);
        let node = self.nodes.swap_remove(idx);

        // The former last node now sits at `idx`; re-point its neighbours.
        if idx < self.nodes.len() {
            let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
            match prev {
                Some(p) => self.nodes[p].next = Some(idx),
                None => self.head = Some(idx),
            }
            match next {
                Some(n) => self.nodes[n].prev = Some(idx),
                None => self.tail = Some(idx),
            }
            if let Some(slot) = self.index.get_mut(&self.nodes[idx].key) {
                *slot = idx;
            }
        }

        self.index.remove(&node.key);
        self.used_bytes -= entry_size(&node.key, &node.value);
        (node.key, node.value)
    }

    /// Walk the structure and check every invariant.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.index.len(), self.nodes.len());

        let mut seen = 0usize;
        let mut bytes = 0u64;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            assert_eq!(node.prev, prev, "broken back link at {}", node.key);
            assert_eq!(self.index.get(&node.key), Some(&idx));
            bytes += entry_size(&node.key, &node.value);
            seen += 1;
            prev = Some(idx);
            cursor = node.next;
        }

        assert_eq!(self.tail, prev);
        assert_eq!(seen, self.nodes.len());
        assert_eq!(bytes, self.used_bytes);
        if self.max_bytes != 0 {
            assert!(self.used_bytes <= self.max_bytes);
        }
    }
}

fn entry_size<V: CacheValue>(key: &str, value: &V) -> u64 {
    (key.len() + value.size()) as u64
}

impl<V> fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("max_bytes", &self.max_bytes)
            .field("used_bytes", &self.used_bytes)
            .field("entries", &self.nodes.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
