//! Identity types for the vault data model.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest user id the server will ever allocate.
pub const MIN_USER_ID: i64 = 1_000_000;

/// A unique identifier for a user account.
///
/// Allocated at registration: a uniform 32-bit sample offset by one million,
/// rejected on collision. The offset keeps ids visually distinct from the
/// small integers used elsewhere in the wire protocol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw user id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A unique identifier for an album.
///
/// Chosen by the client at creation time: 32 random bytes, URL-safe base64.
/// The server treats it as an opaque token but can mint one itself.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlbumId(String);

impl AlbumId {
    /// Create a new random AlbumId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a client-supplied album id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is empty (no album, i.e. Gallery or Trash).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlbumId({})", &self.0[..self.0.len().min(8)])
    }
}

impl From<&str> for AlbumId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A content address in the blob pool.
///
/// The lowercase hex BLAKE3 hash of the blob's ciphertext. The first two
/// hex characters double as the shard directory name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Wrap a hex content hash.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Get the hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-character shard prefix.
    pub fn shard(&self) -> &str {
        &self.0[..2.min(self.0.len())]
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", &self.0[..self.0.len().min(8)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_id_random_is_url_safe() {
        let id = AlbumId::random();
        assert_eq!(id.as_str().len(), 43); // 32 bytes, base64 no pad
        assert!(!id.as_str().contains('+'));
        assert!(!id.as_str().contains('/'));
    }

    #[test]
    fn album_ids_are_unique() {
        assert_ne!(AlbumId::random(), AlbumId::random());
    }

    #[test]
    fn blob_id_shard_prefix() {
        let id = BlobId::new("ab34ef");
        assert_eq!(id.shard(), "ab");
    }

    #[test]
    fn user_id_serializes_as_number() {
        let id = UserId::new(1_000_042);
        assert_eq!(serde_json::to_string(&id).unwrap(), "1000042");
    }
}
