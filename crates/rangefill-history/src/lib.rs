//! # Rangefill History
//!
//! The branch lineage oracle: read access to the causal ancestry of the
//! data a store serves.
//!
//! Every replica's data lives on a *branch*; forking a branch (a replica
//! diverging, a primary change) records the version at which the child
//! split off. When a backfillee registers, the backfiller compares the
//! lineage of its own branch with the lineage the peer claims, to decide
//! whether the two data sets descend from a common point — and if so, up
//! to which version they can be assumed identical.
//!
//! This crate is consumed read-only by the backfiller; recording lineage
//! is the job of whoever creates branches.

pub mod error;
pub mod oracle;

pub use error::{HistoryError, Result};
pub use oracle::{BranchId, BranchPoint, HistoryOracle, Lineage, MemoryHistory, Relation};
