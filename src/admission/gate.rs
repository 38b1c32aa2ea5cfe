//! Bounded-concurrency admission gate.
//!
//! Uses a semaphore sized to `capacity`. When every slot is taken, new
//! requests wait until one is released. Capacity zero disables the gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::GuardError;

/// Limits how many requests are inside the guarded region at once.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slots: Option<Arc<Semaphore>>,
    capacity: usize,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots. `0` never throttles.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            capacity,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.slots.is_some()
    }

    /// Configured number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now. A disabled gate reports its (zero) capacity.
    pub fn available(&self) -> usize {
        self.slots
            .as_ref()
            .map_or(self.capacity, |slots| slots.available_permits())
    }

    /// Tokens currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a slot. There is no timeout and no bound on the number of
    /// waiters; wrap with [`AdmissionGate::admit_within`] or an outer
    /// deadline if that matters.
    pub async fn admit(&self) -> Result<AdmissionToken, GuardError> {
        let Some(slots) = &self.slots else {
            return Ok(AdmissionToken::unlimited());
        };

        let started = Instant::now();
        let permit = slots
            .clone()
            .acquire_owned()
            .await
            // The gate never closes its semaphore.
            .map_err(|_| GuardError::AdmissionUnavailable)?;
        Ok(AdmissionToken::held(permit, started))
    }

    /// Wait at most `wait` for a slot.
    pub async fn admit_within(&self, wait: Duration) -> Result<AdmissionToken, GuardError> {
        tokio::time::timeout(wait, self.admit())
            .await
            .map_err(|_| GuardError::AdmissionUnavailable)?
    }

    /// Give a slot back. Dropping the token does the same.
    pub fn release(&self, token: AdmissionToken) {
        drop(token);
    }
}

/// A held admission slot.
///
/// The slot returns to the pool when the token is dropped, so it is released
/// on every exit path: normal completion, an error response, a panic in the
/// handler, or the request future being cancelled.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the token is dropped"]
pub struct AdmissionToken {
    permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionToken {
    fn unlimited() -> Self {
        Self { permit: None }
    }

    fn held(permit: OwnedSemaphorePermit, started: Instant) -> Self {
        histogram!("guard_admission_wait_seconds").record(started.elapsed().as_secs_f64());
        gauge!("guard_admission_in_flight").increment(1.0);
        Self {
            permit: Some(permit),
        }
    }

    /// Whether this token occupies a real slot.
    pub fn is_limited(&self) -> bool {
        self.permit.is_some()
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            gauge!("guard_admission_in_flight").decrement(1.0);
        }
    }
}
