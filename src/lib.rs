//! peercache - Embeddable Distributed Read-Through Cache
//!
//! Every node holds a byte-budgeted LRU per named group. A key is owned by
//! exactly one node, chosen on a consistent-hash ring; misses are fetched
//! from the owner or produced by the group's loader. Concurrent misses for
//! the same key share a single load.
//!
//! # Architecture
//!
//! ```text
//!            ┌───────────────────────────────────────────┐
//!  get(key) ─►  Group ─► SyncCache (LRU) ─► hit          │
//!            │    │ miss                                  │
//!            │    ▼                                       │
//!            │  Flight (singleflight)                     │
//!            │    │                                       │
//!            │    ├─► PeerPicker ─► PeerGetter ─► remote  │
//!            │    └─► Getter (loader) ─► populate cache   │
//!            └───────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - HTTP peer pool, getter and server
//! - [`cache`] - LRU, byte views, synchronized cache and stats
//! - [`consistent_hash`] - Key to peer mapping
//! - [`domain`] - Ports for loaders and peers
//! - [`error`] - Error types
//! - [`group`] - Groups and the group registry
//! - [`metrics`] - Prometheus text exposition
//! - [`singleflight`] - Request coalescing

pub mod adapters;
pub mod cache;
pub mod consistent_hash;
pub mod domain;
pub mod error;
pub mod group;
pub mod metrics;
pub mod singleflight;

// Re-export commonly used types
pub use adapters::{serve, HttpGetter, HttpPool, HttpPoolConfig, PeerServer};
pub use cache::{ByteView, LruCache, StatsSnapshot};
pub use consistent_hash::HashRing;
pub use domain::{getter_fn, Getter, PeerGetter, PeerPicker};
pub use error::{Error, Result};
pub use group::{Group, GroupBuilder, GroupRegistry};
pub use singleflight::Flight;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
