//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
///
/// A read failure is session-fatal for the backfill session that hit it;
/// the backfiller does not retry (retry policy, if any, belongs to the
/// store implementation).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested range is not served by this store.
    #[error("range {0} is outside the store's region")]
    OutOfRegion(String),

    /// The underlying storage engine failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
