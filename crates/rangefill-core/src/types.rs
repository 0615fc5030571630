//! Strong type definitions for Rangefill.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A key in the partitioned keyspace.
///
/// Keys are arbitrary byte strings ordered lexicographically. The keyspace
/// has a least key (the empty key) and no greatest key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct StoreKey(pub Vec<u8>);

impl StoreKey {
    /// Create a key from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The least key in the keyspace.
    pub const fn min() -> Self {
        Self(Vec::new())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the key in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the empty (least) key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The immediate successor key: the least key strictly greater than
    /// this one. Used to resume a paged scan after its last entry.
    pub fn successor(&self) -> Self {
        let mut bytes = self.0.clone();
        bytes.push(0);
        Self(bytes)
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic()) {
            write!(f, "Key({})", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "Key(0x{})", hex::encode(&self.0))
        }
    }
}

impl From<&str> for StoreKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for StoreKey {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for StoreKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for StoreKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Unique identifier for a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Identifier for one backfill session, assigned by the backfillee when it
/// sends `go`.
///
/// Scoped to one peer. A session id referring to a superseded or finished
/// session is expected under races and is silently ignored by handlers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a random session ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        assert!(StoreKey::from("a") < StoreKey::from("b"));
        assert!(StoreKey::from("a") < StoreKey::from("aa"));
        assert!(StoreKey::min() < StoreKey::from("a"));
    }

    #[test]
    fn test_key_successor_is_tight() {
        let key = StoreKey::from("abc");
        let succ = key.successor();
        assert!(key < succ);
        // No key fits between a key and its successor.
        assert_eq!(succ.as_bytes(), b"abc\0");
    }

    #[test]
    fn test_key_debug_printable() {
        assert_eq!(format!("{:?}", StoreKey::from("abc")), "Key(abc)");
        assert_eq!(format!("{:?}", StoreKey::new(vec![0x00, 0xff])), "Key(0x00ff)");
    }

    #[test]
    fn test_session_id_random_distinct() {
        assert_ne!(SessionId::random(), SessionId::random());
    }
}
