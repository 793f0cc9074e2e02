//! Domain Ports (Port/Adapter Pattern)
//!
//! The capabilities a group depends on. Adapters provide the concrete
//! loader and transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Group                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │       Getter  │  PeerPicker  │  PeerGetter           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │      GetterFn   │   HttpPool   │   HttpGetter        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

// =============================================================================
// Loader Port
// =============================================================================

/// Source of truth consulted on a local cache miss.
///
/// Called only when this node owns the key (or its owner failed) and the
/// value is not cached. Within one group it is never called concurrently
/// for the same key.
///
/// # Example
///
/// ```ignore
/// struct UserTable { pool: PgPool }
///
/// #[async_trait]
/// impl Getter for UserTable {
///     async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
///         let row = sqlx::query("SELECT body FROM users WHERE id = $1")
///             .bind(key)
///             .fetch_one(&self.pool)
///             .await?;
///         Ok(row.get("body"))
///     }
/// }
/// ```
#[async_trait]
pub trait Getter: Send + Sync {
    /// Load the value for `key`.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts an async closure into a [`Getter`].
pub struct GetterFn<F> {
    f: F,
}

impl<F, Fut> GetterFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Getter for GetterFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.f)(key.to_string()).await
    }
}

/// Wrap an async closure as a shareable loader.
pub fn getter_fn<F, Fut>(f: F) -> Arc<dyn Getter>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    Arc::new(GetterFn::new(f))
}

// =============================================================================
// Peer Ports
// =============================================================================

/// Chooses the peer that owns a key.
///
/// Implementations are shared by every group on a node and must be safe to
/// call concurrently.
pub trait PeerPicker: Send + Sync {
    /// The owning peer, or `None` when this node owns the key (or no peers
    /// are known).
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches a value from one remote peer.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Identity of the peer (used in logs and errors).
    fn peer_id(&self) -> &str;

    /// Fetch `key` from `group` on this peer.
    ///
    /// Transport failures, timeouts and non-success responses are all
    /// reported as errors.
    async fn get(&self, group: &str, key: &str) -> Result<Bytes>;
}
