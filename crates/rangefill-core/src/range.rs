//! Key ranges: contiguous partitions of the keyspace.
//!
//! A [`KeyRange`] is half-open: it contains every key `k` with
//! `start <= k < end`, where the end may be unbounded. Regions served by a
//! backfiller and the sub-ranges negotiated with peers are all key ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::StoreKey;

/// The exclusive upper bound of a range.
///
/// Variant order matters: the derived `Ord` makes every bounded end sort
/// below `Unbounded`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RangeEnd {
    /// The range ends just before this key.
    Key(StoreKey),
    /// The range extends to the end of the keyspace.
    Unbounded,
}

impl RangeEnd {
    /// Whether a key lies below this bound.
    pub fn is_above(&self, key: &StoreKey) -> bool {
        match self {
            RangeEnd::Key(end) => key < end,
            RangeEnd::Unbounded => true,
        }
    }
}

/// A half-open key interval `[start, end)`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    start: StoreKey,
    end: RangeEnd,
}

impl KeyRange {
    /// Create a bounded range `[start, end)`.
    ///
    /// Fails if `end < start`. `end == start` yields an empty range.
    pub fn new(start: StoreKey, end: StoreKey) -> Result<Self, CoreError> {
        if end < start {
            return Err(CoreError::InvalidRange {
                start: format!("{:?}", start),
                end: format!("{:?}", end),
            });
        }
        Ok(Self {
            start,
            end: RangeEnd::Key(end),
        })
    }

    /// Create a range from `start` to the end of the keyspace.
    pub fn from_key(start: StoreKey) -> Self {
        Self {
            start,
            end: RangeEnd::Unbounded,
        }
    }

    /// The entire keyspace.
    pub fn all() -> Self {
        Self::from_key(StoreKey::min())
    }

    /// Create from parts that are already known to be ordered.
    pub fn from_parts(start: StoreKey, end: RangeEnd) -> Result<Self, CoreError> {
        match &end {
            RangeEnd::Key(e) if e < &start => Err(CoreError::InvalidRange {
                start: format!("{:?}", start),
                end: format!("{:?}", e),
            }),
            _ => Ok(Self { start, end }),
        }
    }

    /// The inclusive lower bound.
    pub fn start(&self) -> &StoreKey {
        &self.start
    }

    /// The exclusive upper bound.
    pub fn end(&self) -> &RangeEnd {
        &self.end
    }

    /// Whether the range contains no keys.
    pub fn is_empty(&self) -> bool {
        match &self.end {
            RangeEnd::Key(end) => *end <= self.start,
            RangeEnd::Unbounded => false,
        }
    }

    /// Whether `key` lies in the range.
    pub fn contains_key(&self, key: &StoreKey) -> bool {
        key >= &self.start && self.end.is_above(key)
    }

    /// Whether `other` is entirely contained in this range.
    ///
    /// Empty ranges are contained everywhere.
    pub fn contains_range(&self, other: &KeyRange) -> bool {
        other.is_empty() || (other.start >= self.start && other.end <= self.end)
    }

    /// Whether this range and `other` share at least one key.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        match self.intersect(other) {
            Some(r) => !r.is_empty(),
            None => false,
        }
    }

    /// The intersection of two ranges, or `None` if they are disjoint.
    pub fn intersect(&self, other: &KeyRange) -> Option<KeyRange> {
        let start = self.start.clone().max(other.start.clone());
        let end = self.end.clone().min(other.end.clone());
        match &end {
            RangeEnd::Key(e) if *e <= start => None,
            _ => Some(KeyRange { start, end }),
        }
    }
}

impl fmt::Debug for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end {
            RangeEnd::Key(end) => write!(f, "[{:?}, {:?})", self.start, end),
            RangeEnd::Unbounded => write!(f, "[{:?}, ..)", self.start),
        }
    }
}
