//! Scheduled queued executor: a dedicated scheduler task drains the queue

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, info};

use crate::delegate::Delegate;
use crate::error::DispatchError;
use crate::gate::{AdmissionGate, Permit};
use crate::stats::{DispatchStats, RunningGuard, StatsRecorder};
use crate::task::{Task, TaskHandle, with_handle};

use super::handoff::Handoff;
use super::{Executor, ExecutorKind, RejectionHook, report_rejection, report_unstarted_drop};

/// Messages consumed by the scheduler
enum Message {
    Run(Task),
    /// Sentinel: stop consuming
    Shutdown,
}

/// Lifecycle of the scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Terminated,
}

/// Queues tasks for a single scheduler task that admits them one by one
///
/// Producers never wait. The scheduler takes the next task, waits for a
/// permit, and hands the task to the delegate; the permit comes back when the
/// task finishes. Admission order is submission order.
///
/// Dropping the executor closes the queue: the scheduler finishes what is
/// already queued and exits. `shutdown` stops it at the sentinel instead.
pub struct ScheduledQueuedBoundedExecutor {
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<SchedulerShared>,
    state: watch::Receiver<SchedulerState>,
}

struct SchedulerShared {
    delegate: Arc<dyn Delegate>,
    gate: AdmissionGate,
    depth: AtomicUsize,
    interrupt: Notify,
    stats: StatsRecorder,
    on_rejected: Option<RejectionHook>,
}

impl ScheduledQueuedBoundedExecutor {
    /// Create the executor and spawn its scheduler on the current runtime
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
        debug!(%parallelism, "ScheduledQueuedBoundedExecutor::new: called");
        let gate = AdmissionGate::new(parallelism)?;
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SchedulerState::Running);
        let shared = Arc::new(SchedulerShared {
            delegate,
            gate,
            depth: AtomicUsize::new(0),
            interrupt: Notify::new(),
            stats: StatsRecorder::default(),
            on_rejected,
        });

        runtime.spawn(run_scheduler(shared.clone(), rx, state_tx));

        Ok(Self { tx, shared, state })
    }

    /// Enqueue a task; never waits
    ///
    /// Once the scheduler has consumed the shutdown sentinel, submitted tasks
    /// are discarded (counted as dropped) rather than run.
    pub fn submit(&self, task: Task) {
        debug!("ScheduledQueuedBoundedExecutor::submit: called");
        self.shared.stats.submitted();
        self.shared.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Message::Run(task)).is_err() {
            debug!("ScheduledQueuedBoundedExecutor::submit: scheduler terminated, task discarded");
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
            self.shared.stats.dropped();
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

    /// Enqueue the shutdown sentinel; calling this again is harmless
    ///
    /// Tasks queued ahead of the sentinel are still admitted. Tasks queued
    /// behind it are discarded.
    pub fn shutdown(&self) {
        debug!("ScheduledQueuedBoundedExecutor::shutdown: called");
        if self.tx.send(Message::Shutdown).is_err() {
            debug!("ScheduledQueuedBoundedExecutor::shutdown: already terminated");
        }
    }

    /// Wake the scheduler out of its current wait without stopping it
    ///
    /// The scheduler keeps whatever task it holds and goes back to waiting.
    /// An interrupt delivered while the scheduler is busy is kept until its
    /// next wait.
    pub fn interrupt(&self) {
        debug!("ScheduledQueuedBoundedExecutor::interrupt: called");
        self.shared.interrupt.notify_one();
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == SchedulerState::Terminated
    }

    /// Wait for the scheduler to exit
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        // Err means the scheduler task is gone without reporting, which is just as terminal
        let _ = state.wait_for(|s| *s == SchedulerState::Terminated).await;
    }

    /// Tasks queued and not yet taken by the scheduler
    pub fn queue_depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatchStats {
        self.shared.stats.snapshot()
    }
}

async fn run_scheduler(
    shared: Arc<SchedulerShared>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    state_tx: watch::Sender<SchedulerState>,
) {
    info!("Scheduler started");

    loop {
        let message = tokio::select! {
            message = rx.recv() => message,
            _ = shared.interrupt.notified() => {
                debug!("run_scheduler: interrupted while waiting for a task");
                shared.stats.interrupted();
                continue;
            }
        };

        let task = match message {
            Some(Message::Run(task)) => task,
            Some(Message::Shutdown) => {
                info!("Scheduler received shutdown sentinel");
                break;
            }
            None => {
                info!("Scheduler queue closed");
                break;
            }
        };
        shared.depth.fetch_sub(1, Ordering::SeqCst);

        let permit = loop {
            tokio::select! {
                permit = shared.gate.acquire() => break permit,
                _ = shared.interrupt.notified() => {
                    debug!("run_scheduler: interrupted while waiting for a permit");
                    shared.stats.interrupted();
                }
            }
        };

        match permit {
            Ok(permit) => shared.dispatch(task, permit),
            Err(e) => {
                shared.stats.dropped();
                report_rejection(&e, shared.on_rejected.as_ref());
            }
        }
    }

    // Anything behind the sentinel is never admitted
    rx.close();
    let mut discarded = 0usize;
    while let Ok(message) = rx.try_recv() {
        if let Message::Run(task) = message {
            drop(task);
            shared.depth.fetch_sub(1, Ordering::SeqCst);
            shared.stats.dropped();
            discarded += 1;
        }
    }
    if discarded > 0 {
        debug!(%discarded, "run_scheduler: discarded tasks queued behind the sentinel");
    }

    state_tx.send_replace(SchedulerState::Terminated);
    info!("Scheduler terminated");
}

impl SchedulerShared {
    fn dispatch(self: &Arc<Self>, task: Task, permit: Permit) {
        let handoff = Handoff::new();
        let completion = Completion {
            shared: self.clone(),
            handoff: handoff.clone(),
            started: false,
        };
        let wrapped = async move {
            let _permit = permit;
            let mut completion = completion;
            completion.started = true;
            let _running = RunningGuard::enter(&completion.shared.stats);
            task.await;
        };

        let result = self.delegate.dispatch(wrapped.boxed());
        match handoff.settle(result) {
            Ok(_) => self.stats.dispatched(),
            Err(e) => {
                self.stats.rejected();
                report_rejection(&e, self.on_rejected.as_ref());
            }
        }
    }
}

/// Notices a wrapper the delegate accepted and then dropped unstarted
struct Completion {
    shared: Arc<SchedulerShared>,
    handoff: Arc<Handoff>,
    started: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.handoff.wrapper_gone(self.started) && !self.started {
            report_unstarted_drop(&self.shared.stats);
        }
    }
}

#[async_trait]
impl Executor for ScheduledQueuedBoundedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Scheduled
    }

    async fn execute(&self, task: Task) -> Result<(), DispatchError> {
        self.submit(task);
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        ScheduledQueuedBoundedExecutor::queue_depth(self)
    }

    fn stats(&self) -> DispatchStats {
        self.shared.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::RuntimeDelegate;
    use crate::task::task;
    use parking_lot::Mutex;
    use std::time::Duration;

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_requires_runtime() {
        let delegate = Arc::new(RuntimeDelegate::new(
            tokio::runtime::Builder::new_current_thread().build().unwrap().handle().clone(),
        ));
        let result = ScheduledQueuedBoundedExecutor::new(delegate, 2);
        assert_eq!(result.err(), Some(DispatchError::NoRuntime));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_admits_in_submission_order() {
        let executor = ScheduledQueuedBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = seen.clone();
            executor.submit(task(async move {
                seen.lock().push(i);
            }));
        }

        wait_until(|| seen.lock().len() == 20).await;
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
        assert_eq!(executor.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_stops_consumer() {
        let executor = ScheduledQueuedBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 2).unwrap();
        let before = executor.submit_callable(async { "before" });

        executor.shutdown();
        executor.shutdown();
        tokio::time::timeout(Duration::from_secs(2), executor.terminated())
            .await
            .expect("scheduler should stop");
        assert!(executor.is_terminated());
        assert_eq!(before.await, Ok("before"));

        let after = executor.submit_callable(async { "after" });
        assert_eq!(after.await, Err(DispatchError::TaskDropped));
        assert_eq!(executor.stats().dropped, 1);
        assert_eq!(executor.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interrupt_does_not_terminate() {
        let executor = ScheduledQueuedBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 1).unwrap();
        let release = Arc::new(Notify::new());

        // Occupy the only permit so the scheduler blocks on the gate with a task in hand
        let gate = release.clone();
        executor.submit(task(async move { gate.notified().await }));
        let held = executor.submit_callable(async { "held" });
        tokio::time::sleep(Duration::from_millis(30)).await;

        executor.interrupt();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(executor.state(), SchedulerState::Running);

        release.notify_one();
        assert_eq!(held.await, Ok("held"));
        assert!(executor.stats().interrupted >= 1);

        executor.interrupt();
        let idle = executor.submit_callable(async { "idle" });
        assert_eq!(idle.await, Ok("idle"));
        assert!(!executor.is_terminated());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejection_keeps_scheduler_running() {
        let delegate = Arc::new(RuntimeDelegate::current().unwrap());
        let executor = ScheduledQueuedBoundedExecutor::new(delegate.clone(), 1).unwrap();

        delegate.close();
        let rejected = executor.submit_callable(async { 1 });
        assert_eq!(rejected.await, Err(DispatchError::TaskDropped));
        wait_until(|| executor.stats().rejected == 1).await;
        assert!(!executor.is_terminated());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shut_down_runtime_reaches_hook() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let delegate = RuntimeDelegate::new(runtime.handle().clone());
        runtime.shutdown_background();

        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        let hook: RejectionHook = Arc::new(move |_: &DispatchError| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let executor = ScheduledQueuedBoundedExecutor::with_rejection_hook(delegate, 1, hook).unwrap();

        let lost = executor.submit_callable(async { 1 });
        assert_eq!(lost.await, Err(DispatchError::TaskDropped));
        wait_until(|| hits.load(Ordering::SeqCst) == 1).await;

        let stats = executor.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dispatched, 0);
        assert!(!executor.is_terminated());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropping_executor_finishes_queue() {
        let executor = ScheduledQueuedBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 1).unwrap();
        let handles: Vec<_> = (0..5).map(|i| executor.submit_callable(async move { i })).collect();
        drop(executor);

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await, Ok(i));
        }
    }
}
