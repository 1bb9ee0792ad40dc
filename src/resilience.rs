//! Resilience utilities: bounded concurrency for replication workers.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), cluster_replication::resilience::BulkheadFull> {
//! use cluster_replication::resilience::Bulkhead;
//!
//! // Bulkhead: max 10 concurrent jobs
//! let bulkhead = Bulkhead::new(10);
//! let _permit = bulkhead.acquire().await?;
//! // permit dropped = slot released
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error when bulkhead is full.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Bulkhead pattern: limits concurrent operations to prevent resource
/// exhaustion.
///
/// Uses a semaphore to limit how many operations can run simultaneously.
/// Unlike a fixed semaphore, the capacity can be resized at runtime -
/// the engine sizes the replication worker pool to the current peer
/// count and resizes it on every topology change.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Mutex<Arc<Semaphore>>,
    capacity: AtomicUsize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Mutex::new(Arc::new(Semaphore::new(max_concurrent))),
            capacity: AtomicUsize::new(max_concurrent),
        }
    }

    /// Acquire a permit, waiting until one is available.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        let semaphore = self.current();
        semaphore.acquire_owned().await.map_err(|_| BulkheadFull {
            max_concurrent: self.capacity(),
        })
    }

    /// Try to acquire a permit without waiting.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.current().try_acquire_owned().ok()
    }

    /// Replace the capacity.
    ///
    /// Permits already handed out stay valid against the old semaphore;
    /// new acquisitions go against the new one. A resize to zero is
    /// clamped to one so the pool can never wedge.
    pub fn resize(&self, max_concurrent: usize) {
        let max_concurrent = max_concurrent.max(1);
        let mut guard = self.semaphore.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(Semaphore::new(max_concurrent));
        self.capacity.store(max_concurrent, Ordering::SeqCst);
    }

    /// Current configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.current().available_permits()
    }

    fn current(&self) -> Arc<Semaphore> {
        let guard = self.semaphore.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}
