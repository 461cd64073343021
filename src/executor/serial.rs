//! Serial dispatcher: one task at a time, in submission order

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::delegate::Delegate;
use crate::error::{DispatchError, check_parallelism};
use crate::stats::{DispatchStats, RunningGuard, StatsRecorder};
use crate::task::{Task, TaskHandle, with_handle};

use super::handoff::Handoff;
use super::{Executor, ExecutorKind, RejectionHook, report_rejection, report_unstarted_drop};

/// Runs submitted tasks on the delegate strictly one after another
///
/// Enqueueing and the "is anything running?" decision share one lock, so two
/// submitters can never both find the dispatcher idle and start tasks side by
/// side.
pub struct SerialDispatcher {
    inner: Arc<SerialInner>,
}

struct SerialInner {
    delegate: Arc<dyn Delegate>,
    state: Mutex<SerialState>,
    stats: StatsRecorder,
    on_rejected: Option<RejectionHook>,
}

#[derive(Default)]
struct SerialState {
    queue: VecDeque<Task>,
    active: bool,
}

/// Starts the next queued task once the current one is done
///
/// Armed when the wrapper is built, so a wrapper the delegate drops without
/// running still advances the queue.
struct Completion {
    inner: Arc<SerialInner>,
    handoff: Arc<Handoff>,
    started: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.handoff.wrapper_gone(self.started) {
            return;
        }
        if !self.started {
            report_unstarted_drop(&self.inner.stats);
        }
        let mut state = self.inner.state.lock();
        self.inner.dispatch_next(&mut state);
    }
}

impl SerialDispatcher {
    /// Create a dispatcher over `delegate`
    ///
    /// `parallelism` must be at least 1; anything above 1 is logged and
    /// ignored, the dispatcher always runs one task at a time.
    pub fn new<D>(delegate: D, parallelism: usize) -> Result<Self, DispatchError>
    where
        D: Delegate + 'static,
    {
        Self::build(Arc::new(delegate), parallelism, None)
    }

    /// Like `new`, with a callback for rejected dispatches
    pub fn with_rejection_hook<D>(delegate: D, parallelism: usize, hook: RejectionHook) -> Result<Self, DispatchError>
    where
        D: Delegate + 'static,
    {
        Self::build(Arc::new(delegate), parallelism, Some(hook))
    }

    fn build(
        delegate: Arc<dyn Delegate>,
        parallelism: usize,
        on_rejected: Option<RejectionHook>,
    ) -> Result<Self, DispatchError> {
        debug!(%parallelism, "SerialDispatcher::new: called");
        if check_parallelism(parallelism)? > 1 {
            warn!(%parallelism, "Serial dispatcher ignores parallelism above 1");
        }
        Ok(Self {
            inner: Arc::new(SerialInner {
                delegate,
                state: Mutex::new(SerialState::default()),
                stats: StatsRecorder::default(),
                on_rejected,
            }),
        })
    }

    /// Enqueue a task, starting it right away if nothing is running
    pub fn submit(&self, task: Task) {
        debug!("SerialDispatcher::submit: called");
        self.inner.stats.submitted();
        let mut state = self.inner.state.lock();
        state.queue.push_back(task);
        if !state.active {
            self.inner.dispatch_next(&mut state);
        }
    }

    /// Submit a value-returning future and get a handle to its output
    pub fn submit_callable<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = with_handle(future);
        self.submit(task);
        handle
    }

    /// Tasks waiting behind the active one
    pub fn queue_depth(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether a task is currently on the delegate
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.stats.snapshot()
    }
}

impl SerialInner {
    /// Dispatch the head of the queue, or clear the active marker; caller holds the state lock
    fn dispatch_next(self: &Arc<Self>, state: &mut SerialState) {
        while let Some(task) = state.queue.pop_front() {
            state.active = true;
            let handoff = Handoff::new();
            let result = self.delegate.dispatch(self.wrap(task, handoff.clone()));

            match handoff.settle(result) {
                Ok(false) => {
                    self.stats.dispatched();
                    return;
                }
                // Finished before dispatch returned; its guard left the next one to us
                Ok(true) => self.stats.dispatched(),
                Err(e) => {
                    // Remaining tasks stay queued; the next submit resumes them
                    state.active = false;
                    self.stats.rejected();
                    report_rejection(&e, self.on_rejected.as_ref());
                    return;
                }
            }
        }
        state.active = false;
    }

    fn wrap(self: &Arc<Self>, task: Task, handoff: Arc<Handoff>) -> Task {
        let completion = Completion {
            inner: self.clone(),
            handoff,
            started: false,
        };
        async move {
            let mut completion = completion;
            completion.started = true;
            let _running = RunningGuard::enter(&completion.inner.stats);
            task.await;
        }
        .boxed()
    }
}

#[async_trait]
impl Executor for SerialDispatcher {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Serial
    }

    async fn execute(&self, task: Task) -> Result<(), DispatchError> {
        self.submit(task);
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        SerialDispatcher::queue_depth(self)
    }

    fn stats(&self) -> DispatchStats {
        self.inner.stats.snapshot()
    }
}
