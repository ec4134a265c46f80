//! Global download slots shared by every orchestration.
//!
//! One slot covers one object transfer from the first availability probe until
//! its stream terminates. Admission is FIFO.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::DownloadError;

#[derive(Debug, Clone)]
pub struct DownloadSlots {
    max_total: usize,
    semaphore: Arc<Semaphore>,
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct DownloadSlot {
    _permit: OwnedSemaphorePermit,
}

impl DownloadSlots {
    /// Create `max_total` slots (at least one).
    pub fn new(max_total: usize) -> Self {
        let max_total = max_total.max(1);
        Self {
            max_total,
            semaphore: Arc::new(Semaphore::new(max_total)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_total
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.max_total
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot, in arrival order.
    pub async fn acquire(&self) -> Result<DownloadSlot, DownloadError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| DownloadSlot { _permit: permit })
            .map_err(|_| DownloadError::Aborted)
    }
}
