//! Configuration for backfill behavior.

use std::time::Duration;

use crate::error::{Result, SyncError};

/// Tunables for the backfiller and its sessions.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Flow-control capacity per session: the most unacknowledged atom
    /// bytes allowed in flight.
    pub credit_capacity: u64,
    /// Largest single atom the session will send. Must fit the credit
    /// capacity, or no atom could ever be sent.
    pub max_atom_bytes: u64,
    /// Target size of one `Atoms` batch.
    pub max_batch_bytes: u64,
    /// Entries per store scan page.
    pub scan_page: usize,
    /// How long a session waits for more pre-atom hints to arrive before
    /// it gives up on hints and streams the rest of its range.
    pub hint_wait: Duration,
    /// Depth of each peer session's message inbox.
    pub inbox_depth: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            credit_capacity: 256 * 1024,
            max_atom_bytes: 16 * 1024,
            max_batch_bytes: 32 * 1024,
            scan_page: 128,
            hint_wait: Duration::from_millis(200),
            inbox_depth: 64,
        }
    }
}

impl BackfillConfig {
    /// Validate the configuration.
    ///
    /// Checked once when the backfiller is constructed, so a capacity too
    /// small for a single indivisible unit of work is caught before any
    /// session starts.
    pub fn validate(&self) -> Result<()> {
        if self.credit_capacity == 0 || self.credit_capacity > u32::MAX as u64 {
            return Err(SyncError::Config(format!(
                "credit_capacity must be in 1..={}",
                u32::MAX
            )));
        }
        if self.max_atom_bytes == 0 || self.max_atom_bytes > self.max_batch_bytes {
            return Err(SyncError::Config(
                "max_atom_bytes must be non-zero and at most max_batch_bytes".into(),
            ));
        }
        if self.max_batch_bytes > self.credit_capacity {
            return Err(SyncError::Config(
                "max_batch_bytes must not exceed credit_capacity".into(),
            ));
        }
        if self.scan_page == 0 || self.inbox_depth == 0 {
            return Err(SyncError::Config(
                "scan_page and inbox_depth must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
