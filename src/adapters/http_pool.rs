//! HTTP Peer Pool
//!
//! Picks the owner of a key on a consistent-hash ring and fetches from it
//! over HTTP.
//!
//! # Design
//!
//! - The ring and the getter table form one immutable [`PeerSet`] snapshot
//! - `set_peers` builds a fresh snapshot and swaps it in; lookups clone the
//!   `Arc` under a short read lock, so an in-progress pick finishes on the
//!   ring it started with
//! - One `reqwest::Client` (with connection pooling) is shared by all getters

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};

use crate::consistent_hash::{HashRing, DEFAULT_REPLICAS};
use crate::domain::ports::{PeerGetter, PeerPicker};
use crate::error::{Error, Result};

/// Default path prefix for peer requests
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

// =============================================================================
// Configuration
// =============================================================================

/// Pool configuration
#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    /// Path prefix shared by every node; must start and end with `/`
    pub base_path: String,
    /// Virtual nodes per peer
    pub replicas: usize,
    /// Per-request timeout for peer fetches
    pub request_timeout: Duration,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            replicas: DEFAULT_REPLICAS,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpPoolConfig {
    fn validate(&self) -> Result<()> {
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(Error::Config(format!(
                "base path must start and end with '/': {}",
                self.base_path
            )));
        }
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be at least 1".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Pool
// =============================================================================

struct PeerSet {
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// [`PeerPicker`] over a set of HTTP peers
pub struct HttpPool {
    self_url: String,
    config: HttpPoolConfig,
    client: Client,
    peers: RwLock<Arc<PeerSet>>,
}

impl HttpPool {
    /// Create a pool for the node reachable at `self_url`
    pub fn new(self_url: impl Into<String>) -> Result<Self> {
        Self::with_config(self_url, HttpPoolConfig::default())
    }

    /// Create a pool with explicit configuration
    pub fn with_config(self_url: impl Into<String>, config: HttpPoolConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let empty = PeerSet {
            ring: HashRing::new(config.replicas),
            getters: HashMap::new(),
        };

        Ok(Self {
            self_url: normalize_peer(&self_url.into()),
            config,
            client,
            peers: RwLock::new(Arc::new(empty)),
        })
    }

    /// This node's own URL
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Path prefix served and requested by this pool
    pub fn base_path(&self) -> &str {
        &self.config.base_path
    }

    /// Replace the peer set. The list should include this node.
    ///
    /// Addresses are compared without trailing slashes, so
    /// `http://a:8001/` and `http://a:8001` name the same peer.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addrs: Vec<String> = peers
            .into_iter()
            .map(|p| normalize_peer(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        addrs.sort();
        addrs.dedup();

        let mut ring = HashRing::new(self.config.replicas);
        ring.add(&addrs);

        let getters = addrs
            .iter()
            .map(|addr| {
                let getter = HttpGetter::new(addr, &self.config.base_path, self.client.clone());
                (addr.clone(), Arc::new(getter))
            })
            .collect();

        *self.peers.write() = Arc::new(PeerSet { ring, getters });
        info!(self_url = %self.self_url, peers = ?addrs, "peer set updated");
    }

    /// Peer that owns `key` under the current ring
    pub fn owner_of(&self, key: &str) -> Result<String> {
        self.snapshot()
            .ring
            .get(key)
            .map(str::to_string)
            .ok_or(Error::NoPeers)
    }

    /// Current peers, sorted
    pub fn peers(&self) -> Vec<String> {
        self.snapshot().ring.peers()
    }

    fn snapshot(&self) -> Arc<PeerSet> {
        Arc::clone(&self.peers.read())
    }
}

fn normalize_peer(addr: &str) -> String {
    addr.trim().trim_end_matches('/').to_string()
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let set = self.snapshot();
        let owner = set.ring.get(key)?;
        if owner == self.self_url {
            return None;
        }
        debug!(key, peer = owner, "picked peer");
        let getter = set.getters.get(owner)?;
        Some(Arc::clone(getter) as Arc<dyn PeerGetter>)
    }
}

impl std::fmt::Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_url", &self.self_url)
            .field("base_path", &self.config.base_path)
            .field("peers", &self.peers())
            .finish()
    }
}

// =============================================================================
// Getter
// =============================================================================

/// Fetches values from one peer's HTTP endpoint
pub struct HttpGetter {
    peer: String,
    base_url: String,
    client: Client,
}

impl HttpGetter {
    /// Getter for `peer` (e.g. `http://10.0.0.2:8001`) under `base_path`
    pub fn new(peer: impl Into<String>, base_path: &str, client: Client) -> Self {
        let peer = peer.into();
        let base_url = format!("{}{}", peer.trim_end_matches('/'), base_path);
        Self {
            peer,
            base_url,
            client,
        }
    }

    /// Request URL for `key` in `group`
    pub fn url_for(&self, group: &str, key: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        )
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    fn peer_id(&self) -> &str {
        &self.peer
    }

    #[instrument(skip(self), fields(peer = %self.peer))]
    async fn get(&self, group: &str, key: &str) -> Result<Bytes> {
        let url = self.url_for(group, key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::peer_fetch(&self.peer, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::peer_fetch(
                &self.peer,
                format!("server returned: {}", status),
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::peer_fetch(&self.peer, format!("reading response body: {}", e)))
    }
}

impl std::fmt::Debug for HttpGetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGetter")
            .field("peer", &self.peer)
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const NODES: [&str; 3] = [
        "http://127.0.0.1:8001",
        "http://127.0.0.1:8002",
        "http://127.0.0.1:8003",
    ];

    #[test]
    fn test_config_defaults() {
        let config = HttpPoolConfig::default();
        assert_eq!(config.base_path, "/_peercache/");
        assert_eq!(config.replicas, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = HttpPoolConfig {
            base_path: "/_peercache".to_string(),
            ..Default::default()
        };
        assert_matches!(HttpPool::with_config(NODES[0], config), Err(Error::Config(_)));

        let config = HttpPoolConfig {
            replicas: 0,
            ..Default::default()
        };
        assert_matches!(HttpPool::with_config(NODES[0], config), Err(Error::Config(_)));
    }

    #[test]
    fn test_empty_pool_owns_nothing() {
        let pool = HttpPool::new(NODES[0]).unwrap();
        assert!(pool.pick_peer("alice").is_none());
        assert_matches!(pool.owner_of("alice"), Err(Error::NoPeers));
    }

    #[test]
    fn test_pick_peer_skips_self() {
        let pool = HttpPool::new(NODES[0]).unwrap();
        pool.set_peers(NODES);
        assert_eq!(pool.peers().len(), 3);

        let mut remote = 0;
        for i in 0..300 {
            let key = format!("key-{}", i);
            let owner = pool.owner_of(&key).unwrap();
            match pool.pick_peer(&key) {
                Some(peer) => {
                    remote += 1;
                    assert_eq!(peer.peer_id(), owner);
                    assert_ne!(owner, NODES[0]);
                }
                None => assert_eq!(owner, NODES[0]),
            }
        }
        assert!(remote > 0);
    }

    #[test]
    fn test_trailing_slash_names_the_same_peer() {
        let pool = HttpPool::new(NODES[0]).unwrap();
        pool.set_peers(["http://127.0.0.1:8001/"]);
        assert_eq!(pool.peers(), vec![NODES[0].to_string()]);

        let self_picked = (0..50)
            .filter(|i| pool.pick_peer(&format!("key-{}", i)).is_some())
            .count();
        assert_eq!(self_picked, 0);

        let pool = HttpPool::new("http://127.0.0.1:8001/").unwrap();
        assert_eq!(pool.self_url(), NODES[0]);
        pool.set_peers(NODES);
        for i in 0..100 {
            let key = format!("key-{}", i);
            let owned_here = pool.owner_of(&key).unwrap() == NODES[0];
            assert_eq!(pool.pick_peer(&key).is_none(), owned_here);
        }
    }

    #[test]
    fn test_held_snapshot_keeps_old_ring() {
        let pool = HttpPool::new(NODES[0]).unwrap();
        pool.set_peers([NODES[1], NODES[2]]);
        let old = pool.snapshot();

        pool.set_peers([NODES[0]]);

        for i in 0..100 {
            let key = format!("key-{}", i);
            let old_owner = old.ring.get(&key).unwrap();
            assert_ne!(old_owner, NODES[0]);
            assert!(old.getters.contains_key(old_owner));
            // Fresh picks see only this node.
            assert_eq!(pool.owner_of(&key).unwrap(), NODES[0]);
            assert!(pool.pick_peer(&key).is_none());
        }
        assert_eq!(old.ring.peers(), vec![NODES[1].to_string(), NODES[2].to_string()]);
    }

    #[test]
    fn test_nodes_agree_on_owners() {
        let a = HttpPool::new(NODES[0]).unwrap();
        let b = HttpPool::new(NODES[1]).unwrap();
        a.set_peers(NODES);
        // Order and duplicates do not matter.
        b.set_peers([NODES[2], NODES[0], NODES[1], NODES[0]]);

        for i in 0..200 {
            let key = format!("user:{}", i);
            assert_eq!(a.owner_of(&key).unwrap(), b.owner_of(&key).unwrap());
        }
    }

    #[test]
    fn test_set_peers_replaces_ring() {
        let pool = HttpPool::new(NODES[0]).unwrap();
        pool.set_peers(NODES);
        pool.set_peers([NODES[0]]);

        assert_eq!(pool.peers(), vec![NODES[0].to_string()]);
        for i in 0..50 {
            assert!(pool.pick_peer(&format!("key-{}", i)).is_none());
        }
    }

    #[test]
    fn test_getter_url_escapes_parts() {
        let getter = HttpGetter::new("http://127.0.0.1:8002/", DEFAULT_BASE_PATH, Client::new());
        assert_eq!(
            getter.url_for("scores", "a/b c"),
            "http://127.0.0.1:8002/_peercache/scores/a%2Fb%20c"
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_a_fetch_error() {
        let client = Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        // Port 9 (discard) is not listening on loopback.
        let getter = HttpGetter::new("http://127.0.0.1:9", DEFAULT_BASE_PATH, client);

        let err = getter.get("scores", "alice").await.unwrap_err();
        assert_matches!(err, Error::PeerFetch { peer, .. } if peer == "http://127.0.0.1:9");
    }
}
