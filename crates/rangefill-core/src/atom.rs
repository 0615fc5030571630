//! Atoms and pre-atoms: the payloads of the backfill protocol.
//!
//! An [`Atom`] is a full data record the source transmits to bring a peer
//! to parity for one key. A [`PreAtom`] is a lightweight claim by the peer
//! that it already holds the data for a range; it is only ever an
//! efficiency hint, never a source of truth.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::range::KeyRange;
use crate::types::StoreKey;
use crate::version::Version;

/// A single transmitted data record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    /// The record's key.
    pub key: StoreKey,
    /// The record's value.
    pub value: Bytes,
    /// The version at which the source holds this record.
    pub version: Version,
}

impl Atom {
    /// The credit cost of sending this atom, in bytes.
    pub fn size(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }
}

/// A descriptor asserting "the peer already holds data matching this".
///
/// The digest covers every entry of `range` exactly as the source would
/// enumerate it, so a digest match proves the range needs no transfer.
/// A wrong or stale pre-atom costs only a wasted comparison; the range is
/// then streamed as if the hint had never been sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreAtom {
    /// The range the peer claims to hold.
    pub range: KeyRange,
    /// The newest version contained in the claimed data.
    pub version: Version,
    /// Fingerprint of the claimed entries.
    pub digest: RangeDigest,
}

impl PreAtom {
    /// Clip the claimed range to `bounds`.
    ///
    /// Returns `None` if nothing remains. A clipped pre-atom keeps its
    /// digest, which was computed over the original range; callers must
    /// treat the digest as unusable when clipping changed the range.
    pub fn clip_to(&self, bounds: &KeyRange) -> Option<PreAtom> {
        let range = self.range.intersect(bounds)?;
        Some(PreAtom {
            range,
            version: self.version,
            digest: self.digest,
        })
    }
}

/// A 32-byte fingerprint of a range's entries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeDigest(pub [u8; 32]);

impl RangeDigest {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The digest of a range with no entries.
    pub fn empty() -> Self {
        RangeDigestBuilder::new().finish()
    }
}

impl fmt::Debug for RangeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeDigest({})", &self.to_hex()[..16])
    }
}

/// Incremental [`RangeDigest`] computation.
///
/// Entries must be fed in key order; both ends of the protocol walk the
/// range the same way, so equal content yields equal digests. Fields are
/// length-prefixed to keep the encoding unambiguous.
pub struct RangeDigestBuilder {
    hasher: blake3::Hasher,
}

impl RangeDigestBuilder {
    /// Start a new digest.
    pub fn new() -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"rangefill-digest-v0:");
        Self { hasher }
    }

    /// Feed one entry.
    pub fn update_entry(&mut self, key: &StoreKey, value: &[u8], version: Version) {
        self.hasher.update(&(key.len() as u64).to_le_bytes());
        self.hasher.update(key.as_bytes());
        self.hasher.update(&(value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self.hasher.update(&version.0.to_le_bytes());
    }

    /// Finish and return the digest.
    pub fn finish(self) -> RangeDigest {
        RangeDigest(*self.hasher.finalize().as_bytes())
    }
}

impl Default for RangeDigestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> KeyRange {
        KeyRange::new(start.into(), end.into()).unwrap()
    }

    fn digest_of(entries: &[(&str, &[u8], u64)]) -> RangeDigest {
        let mut builder = RangeDigestBuilder::new();
        for (k, v, ver) in entries {
            builder.update_entry(&StoreKey::from(*k), v, Version(*ver));
        }
        builder.finish()
    }

    #[test]
    fn test_digest_deterministic() {
        let a = digest_of(&[("a", b"1", 1), ("b", b"2", 2)]);
        let b = digest_of(&[("a", b"1", 1), ("b", b"2", 2)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_sensitive_to_content() {
        let base = digest_of(&[("a", b"1", 1)]);
        assert_ne!(base, digest_of(&[("a", b"1", 2)]));
        assert_ne!(base, digest_of(&[("a", b"2", 1)]));
        assert_ne!(base, digest_of(&[("b", b"1", 1)]));
        assert_ne!(base, RangeDigest::empty());
    }

    #[test]
    fn test_digest_length_prefix_disambiguates() {
        // ("ab", "c") and ("a", "bc") must not collide.
        let a = digest_of(&[("ab", b"c", 1)]);
        let b = digest_of(&[("a", b"bc", 1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_atom_size() {
        let atom = Atom {
            key: "abc".into(),
            value: Bytes::from_static(b"hello"),
            version: Version(1),
        };
        assert_eq!(atom.size(), 8);
    }

    #[test]
    fn test_pre_atom_clip() {
        let pre = PreAtom {
            range: range("a", "m"),
            version: Version(5),
            digest: RangeDigest::empty(),
        };

        let clipped = pre.clip_to(&range("f", "z")).unwrap();
        assert_eq!(clipped.range, range("f", "m"));
        assert_eq!(clipped.version, Version(5));

        assert!(pre.clip_to(&range("x", "z")).is_none());

        let inside = pre.clip_to(&range("a", "z")).unwrap();
        assert_eq!(inside.range, pre.range);
    }
}
