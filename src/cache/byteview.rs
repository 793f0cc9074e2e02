//! Byte View - Immutable Cached Value
//!
//! The value type stored in every group's cache and returned to callers.

use std::fmt;

use bytes::Bytes;

use super::lru::CacheValue;

/// Immutable view over a cached byte payload.
///
/// The payload is never mutated after construction. Accessors that hand out
/// owned bytes return a copy, so nothing a caller does can reach the cached
/// buffer.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Create a view by copying `data`
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Length of the payload in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy of the payload
    pub fn byte_slice(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Payload as a (lossy) UTF-8 string
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Shared handle to the payload for zero-copy responses.
    ///
    /// `Bytes` is immutable, so sharing it cannot corrupt the cache.
    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }
}

impl From<Vec<u8>> for ByteView {
    /// Takes ownership of the loader's buffer; no other handle to it exists.
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<&str> for ByteView {
    fn from(s: &str) -> Self {
        Self::copy_from_slice(s.as_bytes())
    }
}

impl CacheValue for ByteView {
    fn size(&self) -> usize {
        self.len()
    }
}

impl fmt::Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("len", &self.len())
            .field("data", &self.as_string())
            .finish()
    }
}
