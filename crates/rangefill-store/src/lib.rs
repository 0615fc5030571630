//! # Rangefill Store
//!
//! The store abstraction consumed by the backfiller.
//!
//! The backfiller treats the store as an external, read-only collaborator:
//! it serves an authoritative region of the keyspace and enumerates that
//! region's records in key order. Writes continue to land in the store
//! while backfills run; the only change the backfiller assumes is the
//! application of new writes (never a concurrent backfill into the store
//! or erasure of its data).
//!
//! Enumeration is paged so a session never materializes an unbounded
//! range in memory.

pub mod digest;
pub mod error;
pub mod memory;
pub mod traits;

pub use digest::range_digest;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::{Entry, ScanPage, Store};
