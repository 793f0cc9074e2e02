//! Local Cache Layer
//!
//! Byte-budgeted LRU storage that backs every group.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     SyncCache (per group)                 │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ Mutex<Option<LruCache<ByteView>>>  (lazy)          │  │
//! │  │   index: key ──► node    list: MRU ◄──► LRU        │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │                           │ on evict                     │
//! │                           ▼                              │
//! │                      GroupStats                          │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod byteview;
mod lru;
mod stats;
mod store;

#[cfg(test)]
mod proptest;

pub use byteview::ByteView;
pub use lru::{CacheValue, EvictionCallback, LruCache};
pub use stats::{GroupStats, StatsSnapshot};
pub use store::SyncCache;

/// Default per-group byte budget (64MB)
pub const DEFAULT_CACHE_BYTES: u64 = 64 * 1024 * 1024;
