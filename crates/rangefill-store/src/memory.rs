//! In-memory implementation of the Store trait.
//!
//! Primarily for tests: the backfiller's own test suites and the scripted
//! backfillee both run against it. Thread-safe via RwLock.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use rangefill_core::{KeyRange, RangeEnd, StoreKey, Version};

use crate::error::{Result, StoreError};
use crate::traits::{Entry, ScanPage, Store};

/// In-memory store over one region.
pub struct MemoryStore {
    region: KeyRange,
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    records: BTreeMap<StoreKey, (Bytes, Version)>,
    /// Version handed to the next `put`.
    clock: Version,
}

impl MemoryStore {
    /// Create an empty store serving `region`.
    pub fn new(region: KeyRange) -> Self {
        Self {
            region,
            inner: RwLock::new(MemoryStoreInner {
                records: BTreeMap::new(),
                clock: Version(1),
            }),
        }
    }

    /// Insert a record at an explicit version. Panics if the key is
    /// outside the region (test setup error).
    pub fn insert(&self, key: impl Into<StoreKey>, value: impl Into<Bytes>, version: Version) {
        let key = key.into();
        assert!(
            self.region.contains_key(&key),
            "key {:?} outside region {:?}",
            key,
            self.region
        );
        let mut inner = self.inner.write().unwrap();
        inner.clock = inner.clock.max(version.next());
        inner.records.insert(key, (value.into(), version));
    }

    /// Insert a record at the next version, like a live write would.
    pub fn put(&self, key: impl Into<StoreKey>, value: impl Into<Bytes>) -> Version {
        let key = key.into();
        assert!(self.region.contains_key(&key));
        let mut inner = self.inner.write().unwrap();
        let version = inner.clock;
        inner.clock = version.next();
        inner.records.insert(key, (value.into(), version));
        version
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn region(&self) -> KeyRange {
        self.region.clone()
    }

    async fn scan(&self, range: &KeyRange, limit: usize) -> Result<ScanPage> {
        if !self.region.contains_range(range) {
            return Err(StoreError::OutOfRegion(format!("{:?}", range)));
        }
        if range.is_empty() || limit == 0 {
            return Ok(ScanPage::empty());
        }

        let inner = self.inner.read().unwrap();
        let upper: Bound<&StoreKey> = match range.end() {
            RangeEnd::Key(end) => Bound::Excluded(end),
            RangeEnd::Unbounded => Bound::Unbounded,
        };
        let mut iter = inner
            .records
            .range((Bound::Included(range.start()), upper));

        let mut entries = Vec::with_capacity(limit.min(64));
        let mut more = false;
        for (key, (value, version)) in &mut iter {
            if entries.len() == limit {
                more = true;
                break;
            }
            entries.push(Entry {
                key: key.clone(),
                value: value.clone(),
                version: *version,
            });
        }
        Ok(ScanPage { entries, more })
    }
}
