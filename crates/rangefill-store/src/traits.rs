//! Store trait: the read-only interface the backfiller consumes.

use async_trait::async_trait;
use bytes::Bytes;

use rangefill_core::{KeyRange, StoreKey, Version};

use crate::error::Result;

/// One record of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: StoreKey,
    pub value: Bytes,
    pub version: Version,
}

/// One page of an ordered range scan.
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Entries in ascending key order, at most the requested limit.
    pub entries: Vec<Entry>,
    /// Whether the range holds more entries past the last one returned.
    pub more: bool,
}

impl ScanPage {
    /// An empty, final page.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            more: false,
        }
    }
}

/// Async read access to one served region of the keyspace.
///
/// # Design Notes
///
/// - **Read-only**: the backfiller never mutates the store; any number of
///   sessions may scan concurrently.
/// - **Paged scans**: `scan` returns at most `limit` entries; callers
///   resume from the last key's successor. This is the lazy enumeration
///   interface — a session holds one page at a time.
/// - **Live data**: entries observed by a scan may carry versions newer
///   than when the scan started; the protocol tolerates this because
///   progress is only committed at full-range completion.
#[async_trait]
pub trait Store: Send + Sync {
    /// The region this store serves authoritatively.
    fn region(&self) -> KeyRange;

    /// Scan `range` in ascending key order, returning at most `limit`
    /// entries.
    ///
    /// `range` must be contained in the served region.
    async fn scan(&self, range: &KeyRange, limit: usize) -> Result<ScanPage>;
}
