//! Single-assignment blocking future
//!
//! Hands a result from a dispatched task to synchronous callers. The result is
//! nullable (`Option<T>`), and both "timed out" and "completed with `None`"
//! come back as `None` from [`SyncFuture::get_timeout`]. Callers that need to
//! tell them apart must not store `None`.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// One-shot latch holding a nullable result
#[derive(Debug)]
pub struct SyncFuture<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Completed(Option<T>),
}

impl<T: Clone> SyncFuture<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Store the result and wake every waiter
    ///
    /// Only the first call takes effect; later calls hand their value back.
    pub fn set_result(&self, value: Option<T>) -> Result<(), Option<T>> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Completed(_)) {
            debug!("SyncFuture::set_result: already completed");
            return Err(value);
        }
        *slot = Slot::Completed(value);
        drop(slot);
        self.ready.notify_all();
        Ok(())
    }

    /// Block until a result is stored
    pub fn get(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Slot::Completed(value) = &*slot {
                return value.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Block until a result is stored or `timeout` elapses
    ///
    /// Returns `None` on timeout, indistinguishable from a stored `None`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Slot::Completed(value) = &*slot {
                return value.clone();
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return match &*slot {
                    Slot::Completed(value) => value.clone(),
                    Slot::Pending => None,
                };
            }
        }
    }

    /// Cancellation is not supported
    pub fn cancel(&self) -> bool {
        false
    }

    /// Never true
    pub fn is_cancelled(&self) -> bool {
        false
    }

    /// Whether a non-`None` result has been stored
    ///
    /// A future completed with `None` still reports false here.
    pub fn is_done(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Completed(Some(_)))
    }
}

impl<T: Clone> Default for SyncFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}
