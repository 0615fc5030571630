//! Error types for the unified Rangefill API.

use thiserror::Error;

/// Errors surfaced by the backfill coordinator.
#[derive(Debug, Error)]
pub enum BackfillError {
    /// The protocol machinery failed.
    #[error("sync error: {0}")]
    Sync(#[from] rangefill_sync::SyncError),

    /// The store collaborator failed.
    #[error("store error: {0}")]
    Store(#[from] rangefill_store::StoreError),

    /// The branch history oracle failed.
    #[error("history error: {0}")]
    History(#[from] rangefill_history::HistoryError),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, BackfillError>;
