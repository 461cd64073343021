//! Delegate capability: the externally owned resource that runs task bodies

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::task::Task;

/// Accepts tasks for asynchronous execution
///
/// `dispatch` either takes ownership of the task and arranges for it to run
/// later, or drops it and returns `SubmissionRejected`. It must never poll the
/// task inline: executors call it while holding their queue locks.
pub trait Delegate: Send + Sync {
    fn dispatch(&self, task: Task) -> Result<(), DispatchError>;
}

impl<D: Delegate + ?Sized> Delegate for Arc<D> {
    fn dispatch(&self, task: Task) -> Result<(), DispatchError> {
        (**self).dispatch(task)
    }
}

/// Delegate that spawns tasks onto a tokio runtime
///
/// The runtime's own lifecycle stays with its owner. `close` only stops this
/// delegate from accepting further work, mirroring a shut-down pool. A runtime
/// that has already shut down drops spawned tasks on the spot; the delegate
/// notices, rejects the task and closes itself.
#[derive(Debug)]
pub struct RuntimeDelegate {
    handle: Handle,
    closed: AtomicBool,
}

impl RuntimeDelegate {
    /// Create a delegate spawning onto the given runtime
    pub fn new(handle: Handle) -> Self {
        debug!("RuntimeDelegate::new: called");
        Self {
            handle,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a delegate for the runtime we are currently running on
    pub fn current() -> Result<Self, DispatchError> {
        debug!("RuntimeDelegate::current: called");
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| DispatchError::NoRuntime)
    }

    /// Stop accepting new tasks; already spawned tasks keep running
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("RuntimeDelegate closed");
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Delegate for RuntimeDelegate {
    fn dispatch(&self, task: Task) -> Result<(), DispatchError> {
        if self.is_closed() {
            debug!("RuntimeDelegate::dispatch: closed, rejecting");
            return Err(DispatchError::rejected("delegate closed"));
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let mut unpolled = Unpolled {
            dropped: dropped.clone(),
            armed: true,
        };
        self.handle.spawn(async move {
            unpolled.armed = false;
            task.await;
        });

        if dropped.load(Ordering::SeqCst) {
            warn!("RuntimeDelegate::dispatch: runtime has shut down, rejecting");
            self.close();
            return Err(DispatchError::rejected("runtime shut down"));
        }
        Ok(())
    }
}

/// Flags a spawned future that was dropped before its first poll
struct Unpolled {
    dropped: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for Unpolled {
    fn drop(&mut self) {
        if self.armed {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }
}
