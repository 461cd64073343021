//! Queued bounded executor: non-blocking submit, drained on completion

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::delegate::Delegate;
use crate::error::DispatchError;
use crate::gate::{AdmissionGate, Permit};
use crate::stats::{DispatchStats, RunningGuard, StatsRecorder};
use crate::task::{Task, TaskHandle, with_handle};

use super::handoff::Handoff;
use super::{Executor, ExecutorKind, RejectionHook, report_rejection, report_unstarted_drop};

/// Buffers tasks in a FIFO queue and dispatches them as permits free up
///
/// There is no poller: every submission and every task completion runs the
/// drain loop, which keeps dispatching while a permit and a queued task are
/// both available.
pub struct QueuedBoundedExecutor {
    inner: Arc<QueuedInner>,
}

struct QueuedInner {
    delegate: Arc<dyn Delegate>,
    gate: AdmissionGate,
    queue: Mutex<VecDeque<Task>>,
    stats: StatsRecorder,
    on_rejected: Option<RejectionHook>,
}

/// Returns the permit and resumes draining once a task body is done
///
/// A wrapper dropped unstarted inside `dispatch` only returns its permit; the
/// drain that was dispatching it carries on.
struct Completion {
    inner: Arc<QueuedInner>,
    permit: Option<Permit>,
    handoff: Arc<Handoff>,
    started: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        // Release before draining so the drain can reuse this permit
        drop(self.permit.take());
        if !self.handoff.wrapper_gone(self.started) {
            return;
        }
        if !self.started {
            report_unstarted_drop(&self.inner.stats);
        }
        self.inner.drain();
    }
}

impl QueuedBoundedExecutor {
    /// Create an executor over `delegate` running `parallelism` tasks at once
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
        debug!(%parallelism, "QueuedBoundedExecutor::new: called");
        Ok(Self {
            inner: Arc::new(QueuedInner {
                delegate,
                gate: AdmissionGate::new(parallelism)?,
                queue: Mutex::new(VecDeque::new()),
                stats: StatsRecorder::default(),
                on_rejected,
            }),
        })
    }

    /// Enqueue a task and dispatch as much of the queue as capacity allows
    pub fn submit(&self, task: Task) {
        debug!("QueuedBoundedExecutor::submit: called");
        self.inner.stats.submitted();
        self.inner.queue.lock().push_back(task);
        self.inner.drain();
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

    /// Tasks waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.stats.snapshot()
    }
}

impl QueuedInner {
    /// Dispatch queued tasks while permits are free
    ///
    /// Safe to run from any number of submitters and completions at once.
    /// Popping and dispatching share one critical section, so dispatch order is
    /// queue order and a task is popped exactly once.
    fn drain(self: &Arc<Self>) {
        loop {
            let Some(permit) = self.gate.try_acquire() else {
                return;
            };

            let mut queue = self.queue.lock();
            let Some(task) = queue.pop_front() else {
                drop(queue);
                drop(permit);
                // A submitter may have enqueued while we held the permit and
                // failed its own try_acquire; look again now that it's free.
                if self.queue.lock().is_empty() {
                    return;
                }
                continue;
            };

            let handoff = Handoff::new();
            let result = self.delegate.dispatch(self.wrap(task, permit, handoff.clone()));
            drop(queue);

            match handoff.settle(result) {
                Ok(_) => self.stats.dispatched(),
                Err(e) => {
                    // The unstarted wrapper was dropped, which returned the permit
                    self.stats.rejected();
                    report_rejection(&e, self.on_rejected.as_ref());
                    return;
                }
            }
        }
    }

    fn wrap(self: &Arc<Self>, task: Task, permit: Permit, handoff: Arc<Handoff>) -> Task {
        let completion = Completion {
            inner: self.clone(),
            permit: Some(permit),
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
impl Executor for QueuedBoundedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Queued
    }

    async fn execute(&self, task: Task) -> Result<(), DispatchError> {
        self.submit(task);
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        QueuedBoundedExecutor::queue_depth(self)
    }

    fn stats(&self) -> DispatchStats {
        self.inner.stats.snapshot()
    }
}
