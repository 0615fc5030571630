//! # Rangefill Testkit
//!
//! Testing utilities for Rangefill.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a [`TestCluster`] wiring a backfiller to an in-memory
//!   network, and a scripted [`Backfillee`] driver playing the replica's
//!   side of the protocol
//! - **Generators**: proptest strategies for keys, ranges, versions, and
//!   store contents
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rangefill_core::{KeyRange, Version};
//! use rangefill_testkit::{pre_atom_for, TestCluster};
//!
//! async fn example() {
//!     let cluster = TestCluster::new(KeyRange::all()).await.unwrap();
//!     cluster.store.put("key", "value");
//!
//!     let mut peer = cluster.backfillee().await;
//!     peer.register(KeyRange::all(), Version::ZERO).await;
//!     let session = peer.go(KeyRange::all()).await;
//!     let (atoms, version) = peer.collect_until_done(session).await;
//!     println!("caught up {} atoms at {version}", atoms.len());
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{pre_atom_for, Backfillee, TestCluster};
