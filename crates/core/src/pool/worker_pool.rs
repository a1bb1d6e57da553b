//! FIFO worker pool built on tokio's fair semaphore.
//!
//! A caller holds a [`PoolSlot`] for the whole lifetime of a job pipeline.
//! Dropping the slot releases it, whether the pipeline finished, failed,
//! panicked or was cancelled, and wakes the longest-waiting caller.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was closed while waiting, or before the call.
    #[error("worker pool is closed")]
    Closed,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub active: usize,
    pub waiting: usize,
    /// Highest `active` seen since the pool was created.
    pub peak_active: usize,
    pub total_admitted: u64,
}

#[derive(Default)]
struct PoolStats {
    active: AtomicUsize,
    waiting: AtomicUsize,
    peak_active: AtomicUsize,
    total_admitted: AtomicU64,
}

/// Decrements the waiting counter however `acquire` exits.
struct WaitingGuard<'a>(&'a PoolStats);

impl<'a> WaitingGuard<'a> {
    fn new(stats: &'a PoolStats) -> Self {
        stats.waiting.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency limiter.
#[derive(Clone)]
pub struct WorkerPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Create a pool admitting up to `capacity` holders (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot. Waiters are admitted in arrival order.
    pub async fn acquire(&self) -> Result<PoolSlot, PoolError> {
        let permit = {
            let _waiting = WaitingGuard::new(&self.stats);
            Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?
        };

        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_active.fetch_max(active, Ordering::SeqCst);
        self.stats.total_admitted.fetch_add(1, Ordering::SeqCst);

        Ok(PoolSlot {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Fail every pending and future `acquire`. Held slots stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.capacity,
            active: self.stats.active.load(Ordering::SeqCst),
            waiting: self.stats.waiting.load(Ordering::SeqCst),
            peak_active: self.stats.peak_active.load(Ordering::SeqCst),
            total_admitted: self.stats.total_admitted.load(Ordering::SeqCst),
        }
    }
}

/// An admitted slot. Released on drop.
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
    stats: Arc<PoolStats>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSlot").finish_non_exhaustive()
    }
}
