//! Consistent hashing ring implementation.
//!
//! Each peer is placed on a `u32` ring at `replicas` virtual-node positions.
//! A key belongs to the first virtual node at or after the key's own hash,
//! wrapping around to the start of the ring.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Hash function used to place keys and virtual nodes on the ring.
pub type HashFn = Arc<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Default number of virtual nodes per peer.
pub const DEFAULT_REPLICAS: usize = 50;

/// Consistent hashing ring mapping keys to peer identities.
#[derive(Clone)]
pub struct HashRing {
    hash: HashFn,
    /// Virtual nodes per peer.
    replicas: usize,
    /// Sorted virtual-node hashes.
    keys: Vec<u32>,
    /// Virtual-node hash -> peer.
    owners: HashMap<u32, String>,
}

impl HashRing {
    /// Create an empty ring hashing with CRC-32 (IEEE).
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, Arc::new(crc32fast::hash))
    }

    /// Create an empty ring with a custom hash function.
    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        Self {
            hash,
            replicas,
            keys: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Add peers to the ring.
    ///
    /// Virtual node `i` of `peer` is placed at `hash("{i}{peer}")`.
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let h = self.vnode_hash(peer, i);
                self.keys.push(h);
                self.owners.insert(h, peer.to_string());
            }
            debug!(peer, replicas = self.replicas, "added peer to ring");
        }
        self.keys.sort_unstable();
    }

    /// Remove a peer and all of its virtual nodes.
    pub fn remove(&mut self, peer: &str) {
        for i in 0..self.replicas {
            let h = self.vnode_hash(peer, i);
            if self.owners.get(&h).is_some_and(|owner| owner == peer) {
                self.owners.remove(&h);
            }
        }
        let owners = &self.owners;
        self.keys.retain(|h| owners.contains_key(h));
        self.keys.dedup();
        debug!(peer, "removed peer from ring");
    }

    /// Peer owning `key`, or `None` when the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let h = (self.hash)(key.as_bytes());
        let idx = self.keys.partition_point(|&vnode| vnode < h);
        let vnode = self.keys[idx % self.keys.len()];
        self.owners.get(&vnode).map(String::as_str)
    }

    /// Number of distinct peers on the ring.
    pub fn len(&self) -> usize {
        let mut peers: Vec<&str> = self.owners.values().map(String::as_str).collect();
        peers.sort_unstable();
        peers.dedup();
        peers.len()
    }

    /// Check if the ring has no peers.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Virtual nodes per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Distinct peers on the ring, sorted.
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.owners.values().cloned().collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    fn vnode_hash(&self, peer: &str, i: usize) -> u32 {
        (self.hash)(format!("{}{}", i, peer).as_bytes())
    }
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("vnodes", &self.keys.len())
            .field("peers", &self.peers())
            .finish()
    }
}
