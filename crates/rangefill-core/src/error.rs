//! Error types for Rangefill Core.

use thiserror::Error;

/// Core errors over the backfill data model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid range: end {end} sorts before start {start}")]
    InvalidRange { start: String, end: String },

    #[error("range {range} is not contained in region {region}")]
    OutOfRegion { range: String, region: String },
}
