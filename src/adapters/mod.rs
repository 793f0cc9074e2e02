//! Infrastructure Adapters
//!
//! HTTP implementations of the peer ports.
//!
//! # Architecture
//!
//! ```text
//!        node A                                   node B
//! ┌────────────────────┐                  ┌────────────────────┐
//! │ Group              │                  │ PeerServer         │
//! │   │ pick_peer      │                  │   │ lookup group   │
//! │   ▼                │  GET /_peercache/│   ▼                │
//! │ HttpPool ─► HttpGetter ──────────────►│ Group::get         │
//! │   (ring snapshot)  │  <group>/<key>   │                    │
//! └────────────────────┘                  └────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use peercache::adapters::{serve, HttpPool, PeerServer};
//!
//! let pool = Arc::new(HttpPool::new("http://10.0.0.1:8001")?);
//! pool.set_peers(["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//! group.register_peers(pool.clone())?;
//!
//! let server = Arc::new(PeerServer::new(pool.self_url(), pool.base_path(), registry));
//! serve(TcpListener::bind("0.0.0.0:8001").await?, server).await?;
//! ```

mod http_pool;
mod http_server;

pub use http_pool::{HttpGetter, HttpPool, HttpPoolConfig, DEFAULT_BASE_PATH};
pub use http_server::{serve, PeerServer};
