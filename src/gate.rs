//! Admission gate
//!
//! Counting concurrency limiter shared by the permit-based executors. Built on
//! tokio's semaphore, whose wait queue is FIFO: a released permit goes to the
//! longest-waiting acquirer and `try_acquire` never barges past queued waiters.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{DispatchError, check_parallelism};

/// A held admission permit, returned to the gate when dropped
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

impl Permit {
    /// Return the permit to the gate
    pub fn release(self) {
        drop(self);
    }
}

/// Counting limiter granting at most `parallelism` permits at once
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    parallelism: usize,
}

impl AdmissionGate {
    /// Create a gate with `parallelism` permits
    pub fn new(parallelism: usize) -> Result<Self, DispatchError> {
        debug!(%parallelism, "AdmissionGate::new: called");
        let parallelism = check_parallelism(parallelism)?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(parallelism)),
            parallelism,
        })
    }

    /// Wait for a permit, in arrival order
    pub async fn acquire(&self) -> Result<Permit, DispatchError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::rejected("admission gate closed"))?;
        Ok(Permit { _inner: permit })
    }

    /// Wait for a permit unless `cancel` completes first
    ///
    /// A cancelled wait leaves no trace in the gate: the waiter is removed
    /// from the queue and no permit is consumed.
    pub async fn acquire_or_cancel<C>(&self, cancel: C) -> Result<Permit, DispatchError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            permit = self.acquire() => permit,
            _ = cancel => {
                debug!("AdmissionGate::acquire_or_cancel: wait abandoned");
                Err(DispatchError::InterruptedWhileWaiting)
            }
        }
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<Permit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { _inner: permit })
    }

    /// Number of currently free permits
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured upper bound on held permits
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }
}
