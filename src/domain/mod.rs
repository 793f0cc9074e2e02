//! Domain Layer
//!
//! Trait abstractions for everything a group needs from the outside world.
//!
//! # Usage
//!
//! ```ignore
//! use peercache::domain::ports::{getter_fn, PeerPicker};
//!
//! let loader = getter_fn(|key| async move { db.lookup(&key).await });
//! let group = registry.create_group("scores", 2 << 10, loader)?;
//! group.register_peers(pool)?;
//! ```

pub mod ports;

pub use ports::{getter_fn, Getter, GetterFn, PeerGetter, PeerPicker};
