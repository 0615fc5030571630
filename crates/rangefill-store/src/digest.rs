//! Range fingerprinting over a store.
//!
//! Computes the digest a peer's pre-atom must match for its range to be
//! skipped. Both sides walk the range in key order and feed the same
//! fields, so equal content yields equal digests.

use rangefill_core::{KeyRange, RangeDigest, RangeDigestBuilder, StoreKey, Version};

use crate::error::Result;
use crate::traits::Store;

/// Digest `range` by paged scanning, returning the fingerprint and the
/// newest version observed (zero for an empty range).
pub async fn range_digest<S: Store + ?Sized>(
    store: &S,
    range: &KeyRange,
    page_limit: usize,
) -> Result<(RangeDigest, Version)> {
    let mut builder = RangeDigestBuilder::new();
    let mut max_version = Version::ZERO;
    let mut cursor = range.clone();

    loop {
        let page = store.scan(&cursor, page_limit).await?;
        for entry in &page.entries {
            builder.update_entry(&entry.key, &entry.value, entry.version);
            max_version = max_version.max(entry.version);
        }
        if !page.more {
            break;
        }
        let last: &StoreKey = &page.entries.last().expect("non-final page is non-empty").key;
        cursor = match KeyRange::from_parts(last.successor(), cursor.end().clone()) {
            Ok(rest) => rest,
            Err(_) => break,
        };
    }

    Ok((builder.finish(), max_version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn range(start: &str, end: &str) -> KeyRange {
        KeyRange::new(start.into(), end.into()).unwrap()
    }

    #[tokio::test]
    async fn test_digest_independent_of_page_size() {
        let store = MemoryStore::new(range("a", "z"));
        for (i, key) in ["b", "c", "d", "e", "f"].iter().enumerate() {
            store.insert(*key, format!("value-{i}"), Version(i as u64 + 1));
        }

        let (all_at_once, v1) = range_digest(&store, &range("a", "z"), 100).await.unwrap();
        let (paged, v2) = range_digest(&store, &range("a", "z"), 2).await.unwrap();
        assert_eq!(all_at_once, paged);
        assert_eq!(v1, v2);
        assert_eq!(v1, Version(5));
    }

    #[tokio::test]
    async fn test_empty_range_digest() {
        let store = MemoryStore::new(range("a", "z"));
        let (digest, version) = range_digest(&store, &range("a", "z"), 10).await.unwrap();
        assert_eq!(digest, RangeDigest::empty());
        assert_eq!(version, Version::ZERO);
    }

    #[tokio::test]
    async fn test_subrange_digest_differs() {
        let store = MemoryStore::new(range("a", "z"));
        store.insert("b", "1", Version(1));
        store.insert("m", "2", Version(2));

        let (full, _) = range_digest(&store, &range("a", "z"), 10).await.unwrap();
        let (half, _) = range_digest(&store, &range("a", "m"), 10).await.unwrap();
        assert_ne!(full, half);
    }
}
