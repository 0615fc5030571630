//! # Rangefill Core
//!
//! Pure primitives for Rangefill: keys, ranges, versions, and atoms.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over the data model of the backfill protocol.
//!
//! ## Key Types
//!
//! - [`StoreKey`] - A byte-string key in the partitioned keyspace
//! - [`KeyRange`] - A half-open, possibly right-unbounded key interval
//! - [`Version`] - A monotonic logical timestamp
//! - [`VersionMap`] - A gap-free partition of a region into versioned sub-ranges
//! - [`Atom`] - A full data record transmitted during backfill
//! - [`PreAtom`] - A descriptor of data the receiver already holds
//!
//! ## Digests
//!
//! Pre-atoms carry a [`RangeDigest`]: a domain-separated Blake3 fingerprint
//! of a range's entries. Both sides compute it the same way, so a digest
//! match means the range needs no transfer.

pub mod atom;
pub mod error;
pub mod range;
pub mod types;
pub mod version;

pub use atom::{Atom, PreAtom, RangeDigest, RangeDigestBuilder};
pub use error::CoreError;
pub use range::{KeyRange, RangeEnd};
pub use types::{NodeId, SessionId, StoreKey};
pub use version::{Version, VersionMap};
