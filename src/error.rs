//! Error types for peercache

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a cache group.
///
/// The enum is `Clone` because a single coalesced load hands the same
/// outcome to every caller waiting on that key.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Caller supplied an unusable argument (e.g. an empty key)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No group registered under this name
    #[error("No such group: {0}")]
    GroupNotFound(String),

    /// A group with this name is already registered
    #[error("Group already exists: {0}")]
    GroupExists(String),

    /// The consistent-hash ring has no peers
    #[error("No peers available")]
    NoPeers,

    /// The loader failed; its error is carried verbatim
    #[error("{0}")]
    Loader(Arc<anyhow::Error>),

    /// Fetching from a remote peer failed
    #[error("Peer fetch from {peer} failed: {reason}")]
    PeerFetch { peer: String, reason: String },

    /// The in-flight load panicked
    #[error("Load for key '{key}' panicked: {message}")]
    LoadPanicked { key: String, message: String },

    /// The in-flight load was dropped before it produced a result
    #[error("Load for key '{0}' was abandoned before completing")]
    LoadAbandoned(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a loader failure without altering its message.
    pub fn loader(err: anyhow::Error) -> Self {
        Error::Loader(Arc::new(err))
    }

    /// Build a peer fetch failure.
    pub fn peer_fetch(peer: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::PeerFetch {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }
}
