//! # Rangefill
//!
//! The server side of a backfill protocol for a partitioned key-value
//! store: a [`Backfiller`] streams an authoritative key range to lagging
//! replicas so they catch up, while the source keeps serving live writes.
//!
//! ## Overview
//!
//! - **Atoms**: full records shipped to bring a peer to parity
//! - **Pre-atoms**: peer-supplied hints describing data it already holds,
//!   used only to avoid re-sending identical data
//! - **Sessions**: one `go` starts one session per peer at a time; a new
//!   `go` supersedes, `stop` cancels, and only full completion commits
//!   progress to the peer's version map
//! - **Ordering**: per-peer tokens make a reordering transport look FIFO
//! - **Throttling**: per-session credit bounds unacknowledged bytes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! use rangefill::{Backfiller, BackfillConfig};
//! use rangefill::core::KeyRange;
//! use rangefill::history::MemoryHistory;
//! use rangefill::store::MemoryStore;
//! use rangefill::sync::MemoryNetwork;
//!
//! async fn example() {
//!     let store = Arc::new(MemoryStore::new(KeyRange::all()));
//!     let history = Arc::new(MemoryHistory::new());
//!     let branch = history.register_root();
//!
//!     let network = MemoryNetwork::new();
//!     let transport = Arc::new(network.create_transport(
//!         rangefill::core::NodeId::random(),
//!     ).await);
//!
//!     let backfiller = Arc::new(
//!         Backfiller::new(store, history, branch, transport, BackfillConfig::default())
//!             .unwrap(),
//!     );
//!     // Publish backfiller.descriptor() through your discovery layer,
//!     // then drive it until shutdown:
//!     let shutdown = CancellationToken::new();
//!     backfiller.run(shutdown).await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `rangefill::core` - Primitives (keys, ranges, versions, atoms)
//! - `rangefill::store` - The store collaborator interface
//! - `rangefill::history` - The branch lineage oracle
//! - `rangefill::sync` - Protocol machinery (sessions, ordering, credit)

pub mod backfiller;
pub mod error;

pub use rangefill_core as core;
pub use rangefill_history as history;
pub use rangefill_store as store;
pub use rangefill_sync as sync;

pub use backfiller::{Backfiller, BackfillerDescriptor};
pub use error::{BackfillError, Result};
pub use rangefill_sync::{BackfillConfig, Message, PeerIntro, SessionPhase};
