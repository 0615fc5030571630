//! Error types for the history module.

use thiserror::Error;

/// Errors that can occur during lineage lookups.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The branch is not recorded.
    #[error("unknown branch: {0}")]
    UnknownBranch(String),
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
