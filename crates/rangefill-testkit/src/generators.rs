//! Proptest generators for property-based testing.

use proptest::prelude::*;
use std::collections::BTreeMap;

use rangefill_core::{KeyRange, StoreKey, Version};

/// Generate a short printable key.
pub fn store_key() -> impl Strategy<Value = StoreKey> {
    "[a-z]{1,6}".prop_map(|s| StoreKey::from(s.as_str()))
}

/// Generate a non-empty bounded range.
pub fn key_range() -> impl Strategy<Value = KeyRange> {
    (store_key(), store_key()).prop_map(|(a, b)| {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        // Nudge the end so the range is never empty.
        let end = if start == end { end.successor() } else { end };
        KeyRange::new(start, end).expect("ordered bounds")
    })
}

/// Generate a version.
pub fn version() -> impl Strategy<Value = Version> {
    (0u64..1000).prop_map(Version)
}

/// Generate a value payload.
pub fn value(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate store contents: distinct keys mapped to (value, version).
pub fn entries(max: usize) -> impl Strategy<Value = BTreeMap<StoreKey, (Vec<u8>, Version)>> {
    prop::collection::btree_map(store_key(), (value(16), version()), 0..=max)
}
