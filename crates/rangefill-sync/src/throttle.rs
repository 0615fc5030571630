//! Credit-based flow control for one backfill session.
//!
//! A [`Throttle`] bounds how many bytes of atoms may be in flight (sent
//! but not yet acknowledged) at any instant. The production loop acquires
//! credit before sending; acknowledgements release it. Waiting is
//! first-blocked, first-served: the wait queue is a fair tokio semaphore.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Result, SyncError};

/// Shared credit ledger with a fixed capacity.
///
/// Clones share the same ledger; the peer session holds one clone to
/// route acknowledgements while the session's production loop holds
/// another.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<ThrottleInner>,
}

struct ThrottleInner {
    capacity: u64,
    sem: Semaphore,
    /// Bytes acquired and not yet released. Releases are clamped to this,
    /// so inflated acknowledgement sizes cannot mint credit.
    outstanding: AtomicU64,
}

impl Throttle {
    /// Create a throttle with `capacity` bytes of credit.
    ///
    /// Zero capacity, or a capacity that does not fit the semaphore's
    /// permit space, is a configuration error.
    pub fn new(capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::Config("credit capacity must be non-zero".into()));
        }
        if capacity > u32::MAX as u64 {
            return Err(SyncError::Config(format!(
                "credit capacity {capacity} exceeds {}",
                u32::MAX
            )));
        }
        Ok(Self {
            inner: Arc::new(ThrottleInner {
                capacity,
                sem: Semaphore::new(capacity as usize),
                outstanding: AtomicU64::new(0),
            }),
        })
    }

    /// Total credit capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    /// Bytes currently in flight.
    pub fn outstanding(&self) -> u64 {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Reserve `n` bytes of credit, suspending until available.
    ///
    /// An `n` larger than the whole capacity could never be satisfied and
    /// is reported as a configuration error instead of waiting forever.
    pub async fn acquire(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if n > self.inner.capacity {
            return Err(SyncError::Config(format!(
                "acquisition of {n} bytes exceeds credit capacity {}",
                self.inner.capacity
            )));
        }
        let permit = self
            .inner
            .sem
            .acquire_many(n as u32)
            .await
            // The semaphore is never closed.
            .map_err(|_| SyncError::Interrupted)?;
        permit.forget();
        self.inner.outstanding.fetch_add(n, Ordering::AcqRel);
        Ok(())
    }

    /// Return up to `n` bytes of credit, waking suspended acquirers in
    /// arrival order. Amounts beyond what is outstanding are ignored.
    pub fn release(&self, n: u64) -> u64 {
        let mut granted = 0;
        let mut current = self.inner.outstanding.load(Ordering::Acquire);
        while granted == 0 && current > 0 && n > 0 {
            let take = n.min(current);
            match self.inner.outstanding.compare_exchange(
                current,
                current - take,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => granted = take,
                Err(actual) => current = actual,
            }
        }
        if granted > 0 {
            self.inner.sem.add_permits(granted as usize);
        }
        granted
    }

    /// Return all outstanding credit. Part of every session teardown
    /// path, so capacity is never leaked by a cancelled session.
    pub fn release_all(&self) -> u64 {
        let granted = self.inner.outstanding.swap(0, Ordering::AcqRel);
        if granted > 0 {
            self.inner.sem.add_permits(granted as usize);
        }
        granted
    }
}
