//! Album permission bitmask.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The permission string attached to a shared album.
///
/// Four characters: a format version (`'1'`) followed by three flags,
/// `allow_add`, `allow_share`, `allow_copy`, each `'0'` or `'1'`.
/// `"1111"` grants everything; an empty or malformed string grants nothing.
/// Only non-owners are subject to these flags; the owner can always do
/// everything.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(String);

impl Permissions {
    /// Wrap a client-supplied permission string.
    pub fn new(p: impl Into<String>) -> Self {
        Self(p.into())
    }

    /// True when the string has the expected version and length.
    pub fn is_valid(&self) -> bool {
        self.0.len() == 4
            && self.0.starts_with('1')
            && self.0[1..].bytes().all(|b| b == b'0' || b == b'1')
    }

    fn flag(&self, index: usize) -> bool {
        self.is_valid() && self.0.as_bytes()[index] == b'1'
    }

    /// May a non-owner add files to the album?
    pub fn allow_add(&self) -> bool {
        self.flag(1)
    }

    /// May a non-owner share the album further?
    pub fn allow_share(&self) -> bool {
        self.flag(2)
    }

    /// May a non-owner copy files out of the album?
    pub fn allow_copy(&self) -> bool {
        self.flag(3)
    }

    /// The raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no permission string was ever set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:?})", self.0)
    }
}
