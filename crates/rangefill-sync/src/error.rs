//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur inside the backfill protocol machinery.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A cancellation signal fired during a suspend point.
    ///
    /// Always recovered locally: the affected session or handler unwinds
    /// and releases its resources. Never surfaces past the peer session
    /// boundary.
    #[error("interrupted")]
    Interrupted,

    /// The flow-control configuration cannot admit the work.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Store read failed; fatal for the session that hit it.
    #[error("store error: {0}")]
    Store(#[from] rangefill_store::StoreError),

    /// Range arithmetic failed.
    #[error("range error: {0}")]
    Range(#[from] rangefill_core::CoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Message encoding/decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
