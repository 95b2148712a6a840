//! Admission control for foreach workers.
//!
//! A worker must hold an [`AdmissionPermit`] for its whole lifetime. The permit
//! is released on drop, so every exit path of a worker (normal return, error,
//! panic unwinding, task abort) gives its slot back to the pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission cancelled")]
    Cancelled,
    #[error("admission pool closed")]
    Closed,
}

struct Occupancy {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        now
    }

    fn leave(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

/// A held admission slot. Dropping it returns the slot to the pool.
#[must_use = "dropping the permit immediately releases the admission slot"]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    occupancy: Arc<Occupancy>,
}

impl AdmissionPermit {
    fn new(permit: OwnedSemaphorePermit, occupancy: Arc<Occupancy>) -> Self {
        let in_flight = occupancy.enter();
        tracing::trace!(in_flight, "Admission permit acquired");
        Self {
            _permit: permit,
            occupancy,
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let in_flight = self.occupancy.leave();
        tracing::trace!(in_flight, "Admission permit released");
    }
}

/// Counting semaphore bounding how many workers run at once.
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    occupancy: Arc<Occupancy>,
}

impl AdmissionPool {
    /// Create a pool with `capacity` slots. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            occupancy: Arc::new(Occupancy {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(AdmissionPermit::new(permit, Arc::clone(&self.occupancy))),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => {
                tracing::error!("Admission pool closed");
                None
            }
        }
    }

    /// Wait for a free slot, giving up as soon as `cancel` fires.
    ///
    /// An already-cancelled token wins over a free slot.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            permit = semaphore.acquire_owned() => {
                let permit = permit.map_err(|_| AdmissionError::Closed)?;
                Ok(AdmissionPermit::new(permit, Arc::clone(&self.occupancy)))
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.occupancy.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of permits held at the same time since the pool was created.
    pub fn peak(&self) -> usize {
        self.occupancy.peak.load(Ordering::Acquire)
    }

    /// Close the pool. Pending and future `acquire` calls fail with [`AdmissionError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}
