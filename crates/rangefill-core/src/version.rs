//! Logical versions and the per-peer version map.
//!
//! A [`VersionMap`] records, for every key of a negotiated region, the
//! version up to which the peer is known to be caught up. It is a gap-free
//! partition: sub-ranges never overlap and their union is exactly the
//! owning region. Completed backfill sessions merge their observed version
//! in; versions never move backward.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CoreError;
use crate::range::{KeyRange, RangeEnd};
use crate::types::StoreKey;

/// A monotonically increasing logical timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(pub u64);

impl Version {
    /// The zero version (nothing observed yet).
    pub const ZERO: Self = Self(0);

    /// The next version after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One sub-range of the partition. Keyed in the map by its start key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Span {
    end: RangeEnd,
    version: Version,
}

/// A partition of a region into disjoint, gap-free, versioned sub-ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMap {
    region: KeyRange,
    spans: BTreeMap<StoreKey, Span>,
}

impl VersionMap {
    /// Create a map covering `region` uniformly at `version`.
    pub fn new(region: KeyRange, version: Version) -> Self {
        let mut spans = BTreeMap::new();
        spans.insert(
            region.start().clone(),
            Span {
                end: region.end().clone(),
                version,
            },
        );
        Self { region, spans }
    }

    /// The region this map partitions.
    pub fn region(&self) -> &KeyRange {
        &self.region
    }

    /// The version recorded for `key`, if the key is in the region.
    pub fn version_at(&self, key: &StoreKey) -> Option<Version> {
        let (_, span) = self.spans.range(..=key.clone()).next_back()?;
        span.end.is_above(key).then_some(span.version)
    }

    /// Raise the version of every key in `range` to at least `version`.
    ///
    /// Keys already at a higher version keep it; the map never moves a
    /// version backward. `range` must be contained in the region.
    pub fn merge(&mut self, range: &KeyRange, version: Version) -> Result<(), CoreError> {
        if !self.region.contains_range(range) {
            return Err(CoreError::OutOfRegion {
                range: format!("{:?}", range),
                region: format!("{:?}", self.region),
            });
        }
        if range.is_empty() {
            return Ok(());
        }

        self.split_at(range.start());
        if let RangeEnd::Key(end) = range.end() {
            self.split_at(end);
        }

        let affected: Vec<StoreKey> = self
            .spans
            .range(range.start().clone()..)
            .take_while(|(start, _)| range.contains_key(start))
            .map(|(start, _)| start.clone())
            .collect();
        for start in affected {
            let span = self.spans.get_mut(&start).expect("affected span exists");
            span.version = span.version.max(version);
        }

        self.coalesce();
        Ok(())
    }

    /// The sub-ranges of the partition with their versions, in key order.
    pub fn spans(&self) -> Vec<(KeyRange, Version)> {
        self.spans
            .iter()
            .map(|(start, span)| {
                let range = KeyRange::from_parts(start.clone(), span.end.clone())
                    .expect("span bounds are ordered");
                (range, span.version)
            })
            .collect()
    }

    /// Split the span containing `at` so that a span boundary falls on `at`.
    /// No-op if `at` is already a boundary or outside the region.
    fn split_at(&mut self, at: &StoreKey) {
        let Some((start, span)) = self.spans.range(..=at.clone()).next_back() else {
            return;
        };
        if start == at || !span.end.is_above(at) {
            return;
        }
        let tail = Span {
            end: span.end.clone(),
            version: span.version,
        };
        let start = start.clone();
        self.spans
            .get_mut(&start)
            .expect("span was just looked up")
            .end = RangeEnd::Key(at.clone());
        self.spans.insert(at.clone(), tail);
    }

    /// Merge runs of adjacent spans that carry the same version.
    fn coalesce(&mut self) {
        let starts: Vec<StoreKey> = self.spans.keys().cloned().collect();
        for start in starts {
            loop {
                let Some(span) = self.spans.get(&start).cloned() else {
                    break;
                };
                let RangeEnd::Key(end) = &span.end else {
                    break;
                };
                let Some(next) = self.spans.get(end) else {
                    break;
                };
                if next.version != span.version {
                    break;
                }
                let next_end = next.end.clone();
                self.spans.remove(end);
                self.spans
                    .get_mut(&start)
                    .expect("span was just looked up")
                    .end = next_end;
            }
        }
    }
}
