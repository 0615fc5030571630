//! # Rangefill Sync
//!
//! The backfill protocol machinery: everything the source-side
//! coordinator needs to serve many concurrent, independently-progressing
//! backfill requests.
//!
//! ## Key Properties
//!
//! - **Ordered**: each peer's messages are applied in the order the peer
//!   sent them, even over a reordering transport
//! - **Bounded**: credit-based throttling caps in-flight atom bytes per
//!   session, so a slow consumer cannot balloon the source's memory
//! - **Cancellable**: every suspend point observes cancellation; sessions
//!   release all resources on every exit path
//! - **Restartable**: partial progress is never committed, so any aborted
//!   session can be redone at worst by re-sending data
//! - **Isolated**: peers share nothing but the read-only store, so one
//!   slow backfillee cannot starve another
//!
//! ## Message Flow
//!
//! ```text
//! Backfillee                           Source
//!   |-------- Intro ------------------>|   (peer session created)
//!   |-------- PreAtoms --------------->|   (delta hints staged)
//!   |-------- Go --------------------->|   (session starts)
//!   |<------- Atoms -------------------|
//!   |-------- AckAtoms --------------->|   (credit returned)
//!   |<------- Atoms -------------------|
//!   |<------- Done --------------------|   (version map merged)
//!   |-------- Stop ------------------->|   (no-op after Done)
//! ```

pub mod config;
pub mod error;
pub mod messages;
pub mod peer;
pub mod sequencer;
pub mod session;
pub mod throttle;
pub mod transport;

pub use config::BackfillConfig;
pub use error::{Result, SyncError};
pub use messages::{decode, encode, limits, Message, PeerIntro, PROTOCOL_VERSION};
pub use peer::PeerSession;
pub use sequencer::{Admission, OrderingToken, Sequencer, TokenIssuer};
pub use session::SessionPhase;
pub use throttle::Throttle;
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
