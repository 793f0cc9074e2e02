//! Cache Groups
//!
//! A group is a named cache namespace with its own loader and byte budget.
//!
//! # Lookup Flow
//!
//! ```text
//! get(key) ──► SyncCache ── hit ──► value
//!                 │
//!                miss
//!                 ▼
//!          Flight::run(key)   (one execution per key in flight)
//!                 │
//!      ┌──────────┴───────────┐
//!      ▼                      ▼
//!  remote owner?          owned locally
//!  PeerGetter::get        Getter::get ──► populate SyncCache
//!      │ error                 ▲
//!      └───────────────────────┘  (fall back to local load)
//! ```
//!
//! Groups are created through a [`GroupRegistry`], which the transport also
//! uses to resolve incoming peer requests.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ByteView, GroupStats, StatsSnapshot, SyncCache, DEFAULT_CACHE_BYTES};
use crate::domain::ports::{Getter, PeerGetter, PeerPicker};
use crate::error::{Error, Result};
use crate::singleflight::Flight;

// =============================================================================
// Group
// =============================================================================

/// A cache namespace: local LRU, coalesced loads, optional peer routing.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    main_cache: SyncCache,
    peers: OnceCell<Arc<dyn PeerPicker>>,
    loader: Flight<ByteView>,
    stats: Arc<GroupStats>,
}

impl Group {
    /// Start building a group called `name`
    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            cache_bytes: DEFAULT_CACHE_BYTES,
            getter: None,
            peers: None,
        }
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach the peer picker. Allowed once per group.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) -> Result<()> {
        self.peers.set(peers).map_err(|_| {
            Error::Config(format!(
                "peers already registered for group '{}'",
                self.name
            ))
        })
    }

    /// Whether a peer picker has been registered
    pub fn has_peers(&self) -> bool {
        self.peers.get().is_some()
    }

    /// Get the value for `key`, loading it on a miss.
    #[instrument(skip(self), fields(group = %self.name))]
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key is required".to_string()));
        }
        self.stats.record_get();

        if let Some(value) = self.main_cache.get(key) {
            self.stats.record_cache_hit();
            debug!("cache hit");
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        self.stats.record_load();

        self.loader
            .run(key, async {
                self.stats.record_load_executed();

                if let Some(peer) = self.peers.get().and_then(|p| p.pick_peer(key)) {
                    match self.get_from_peer(peer.as_ref(), key).await {
                        Ok(value) => {
                            self.stats.record_peer_load();
                            return Ok(value);
                        }
                        Err(e) => {
                            self.stats.record_peer_error();
                            warn!(
                                peer = peer.peer_id(),
                                error = %e,
                                "peer fetch failed, loading locally"
                            );
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        let bytes = self.getter.get(key).await.map_err(|e| {
            self.stats.record_local_load_error();
            warn!(error = %e, "loader failed");
            Error::loader(e)
        })?;
        self.stats.record_local_load();

        let value = ByteView::from(bytes);
        self.populate_cache(key, value.clone());
        Ok(value)
    }

    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        debug!(peer = peer.peer_id(), "fetching from peer");
        let bytes = peer.get(&self.name, key).await?;
        Ok(ByteView::from(bytes))
    }

    fn populate_cache(&self, key: &str, value: ByteView) {
        self.main_cache.add(key, value);
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cache hit ratio since creation
    pub fn hit_ratio(&self) -> f64 {
        self.stats.hit_ratio()
    }

    /// Number of locally cached entries
    pub fn cache_len(&self) -> usize {
        self.main_cache.len()
    }

    /// Bytes held by the local cache
    pub fn cache_size_bytes(&self) -> u64 {
        self.main_cache.size_bytes()
    }

    /// Configured byte budget
    pub fn cache_bytes(&self) -> u64 {
        self.main_cache.capacity()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("cache", &self.main_cache)
            .field("has_peers", &self.has_peers())
            .finish()
    }
}

/// Builder for [`Group`]
pub struct GroupBuilder {
    name: String,
    cache_bytes: u64,
    getter: Option<Arc<dyn Getter>>,
    peers: Option<Arc<dyn PeerPicker>>,
}

impl GroupBuilder {
    /// Byte budget for the local cache (0 = unbounded)
    pub fn cache_bytes(mut self, cache_bytes: u64) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// Loader consulted on local misses (required)
    pub fn getter(mut self, getter: Arc<dyn Getter>) -> Self {
        self.getter = Some(getter);
        self
    }

    /// Peer picker, if known at construction time
    pub fn peers(mut self, peers: Arc<dyn PeerPicker>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Validate and build the group
    pub fn build(self) -> Result<Group> {
        if self.name.is_empty() {
            return Err(Error::Config("group name is required".to_string()));
        }
        let getter = self.getter.ok_or_else(|| {
            Error::Config(format!("group '{}' requires a getter", self.name))
        })?;

        let stats = Arc::new(GroupStats::new());
        let peers = OnceCell::new();
        if let Some(picker) = self.peers {
            // Fresh cell, cannot already be set.
            let _ = peers.set(picker);
        }

        Ok(Group {
            main_cache: SyncCache::new(self.cache_bytes, Arc::clone(&stats)),
            name: self.name,
            getter,
            peers,
            loader: Flight::new(),
            stats,
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Named groups known to this node. Append-only.
#[derive(Default)]
pub struct GroupRegistry {
    groups: DashMap<String, Arc<Group>>,
}

impl GroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a group
    pub fn create_group(
        &self,
        name: impl Into<String>,
        cache_bytes: u64,
        getter: Arc<dyn Getter>,
    ) -> Result<Arc<Group>> {
        let group = Group::builder(name)
            .cache_bytes(cache_bytes)
            .getter(getter)
            .build()?;
        self.register(group)
    }

    /// Register an already built group. Names are case-sensitive and unique.
    pub fn register(&self, group: Group) -> Result<Arc<Group>> {
        match self.groups.entry(group.name().to_string()) {
            Entry::Occupied(entry) => Err(Error::GroupExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                let group = Arc::new(group);
                info!(
                    group = group.name(),
                    cache_bytes = group.cache_bytes(),
                    "registered group"
                );
                entry.insert(Arc::clone(&group));
                Ok(group)
            }
        }
    }

    /// Find a group by name
    pub fn lookup(&self, name: &str) -> Result<Arc<Group>> {
        self.groups
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))
    }

    /// All groups, sorted by name
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self
            .groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    /// Registered group names, sorted
    pub fn names(&self) -> Vec<String> {
        self.groups().iter().map(|g| g.name().to_string()).collect()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Check if no group is registered
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
