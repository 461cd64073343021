//! Immediate bounded executor: the submitter waits for admission

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::delegate::Delegate;
use crate::error::DispatchError;
use crate::gate::{AdmissionGate, Permit};
use crate::stats::{DispatchStats, RunningGuard, StatsRecorder};
use crate::task::{Task, TaskHandle, with_handle};

use super::handoff::Handoff;
use super::{Executor, ExecutorKind, report_unstarted_drop};

/// Dispatches each task as soon as its submitter obtains a permit
///
/// `submit` suspends the caller until one of the `parallelism` permits is
/// free, so a saturated executor slows its producers instead of buffering.
/// Delegate rejections are reported straight back to the caller.
pub struct ImmediateBoundedExecutor {
    delegate: Arc<dyn Delegate>,
    gate: AdmissionGate,
    stats: Arc<StatsRecorder>,
}

impl ImmediateBoundedExecutor {
    /// Create an executor over `delegate` admitting `parallelism` tasks at once
    pub fn new<D>(delegate: D, parallelism: usize) -> Result<Self, DispatchError>
    where
        D: Delegate + 'static,
    {
        debug!(%parallelism, "ImmediateBoundedExecutor::new: called");
        Ok(Self {
            delegate: Arc::new(delegate),
            gate: AdmissionGate::new(parallelism)?,
            stats: Arc::new(StatsRecorder::default()),
        })
    }

    /// Wait for a permit, then hand the task to the delegate
    ///
    /// Dropping the returned future while it waits abandons the task; the
    /// abandonment is counted and logged.
    pub async fn submit(&self, task: Task) -> Result<(), DispatchError> {
        debug!("ImmediateBoundedExecutor::submit: called");
        self.stats.submitted();
        let waiting = Waiting::new(&self.stats);
        let permit = self.gate.acquire().await?;
        waiting.admitted();
        self.dispatch(task, permit)
    }

    /// Like `submit`, but give up waiting when `cancel` completes first
    ///
    /// An abandoned wait returns `InterruptedWhileWaiting` and the task is
    /// dropped without ever reaching the delegate.
    pub async fn submit_or_cancel<C>(&self, task: Task, cancel: C) -> Result<(), DispatchError>
    where
        C: Future<Output = ()>,
    {
        debug!("ImmediateBoundedExecutor::submit_or_cancel: called");
        self.stats.submitted();
        let waiting = Waiting::new(&self.stats);
        let permit = self.gate.acquire_or_cancel(cancel).await?;
        waiting.admitted();
        self.dispatch(task, permit)
    }

    /// Submit a value-returning future and get a handle to its output
    pub async fn submit_callable<F, T>(&self, future: F) -> Result<TaskHandle<T>, DispatchError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = with_handle(future);
        self.submit(task).await?;
        Ok(handle)
    }

    /// Currently free permits
    pub fn available_permits(&self) -> usize {
        self.gate.available()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }

    fn dispatch(&self, task: Task, permit: Permit) -> Result<(), DispatchError> {
        let handoff = Handoff::new();
        let completion = Completion {
            stats: self.stats.clone(),
            handoff: handoff.clone(),
            started: false,
        };
        let wrapped = async move {
            let _permit = permit;
            let mut completion = completion;
            completion.started = true;
            let _running = RunningGuard::enter(&completion.stats);
            task.await;
        };

        // A rejected task is dropped by the delegate, returning its permit
        let result = self.delegate.dispatch(wrapped.boxed());
        match handoff.settle(result) {
            Ok(_) => {
                self.stats.dispatched();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "ImmediateBoundedExecutor: delegate rejected task");
                self.stats.rejected();
                Err(e)
            }
        }
    }
}

/// Counts a submission abandoned before it got a permit
struct Waiting<'a> {
    stats: &'a StatsRecorder,
    armed: bool,
}

impl<'a> Waiting<'a> {
    fn new(stats: &'a StatsRecorder) -> Self {
        Self { stats, armed: true }
    }

    fn admitted(mut self) {
        self.armed = false;
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("ImmediateBoundedExecutor: wait for a permit abandoned, task not submitted");
            self.stats.interrupted();
            self.stats.dropped();
        }
    }
}

/// Notices a wrapper the delegate accepted and then dropped unstarted
struct Completion {
    stats: Arc<StatsRecorder>,
    handoff: Arc<Handoff>,
    started: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.handoff.wrapper_gone(self.started) && !self.started {
            report_unstarted_drop(&self.stats);
        }
    }
}

#[async_trait]
impl Executor for ImmediateBoundedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Immediate
    }

    async fn execute(&self, task: Task) -> Result<(), DispatchError> {
        self.submit(task).await
    }

    fn queue_depth(&self) -> usize {
        0
    }

    fn stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::RuntimeDelegate;
    use crate::task::task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Delegate that rejects the nth dispatch (1-based) and spawns the rest
    struct RejectNth {
        inner: RuntimeDelegate,
        nth: usize,
        calls: AtomicUsize,
    }

    impl Delegate for RejectNth {
        fn dispatch(&self, task: Task) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.nth {
                return Err(DispatchError::rejected("configured rejection"));
            }
            self.inner.dispatch(task)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submitter_waits_when_saturated() {
        let executor = ImmediateBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 1).unwrap();
        let release = Arc::new(Notify::new());

        let gate = release.clone();
        executor
            .submit(task(async move { gate.notified().await }))
            .await
            .unwrap();
        assert_eq!(executor.available_permits(), 0);

        // Second submit cannot complete until the first task finishes
        let blocked = tokio::time::timeout(Duration::from_millis(50), executor.submit(task(async {}))).await;
        assert!(blocked.is_err());

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(2), executor.submit(task(async {})))
            .await
            .expect("permit should free up")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejection_returns_permit() {
        let delegate = RejectNth {
            inner: RuntimeDelegate::current().unwrap(),
            nth: 3,
            calls: AtomicUsize::new(0),
        };
        let executor = ImmediateBoundedExecutor::new(delegate, 2).unwrap();
        let release = Arc::new(Notify::new());

        for _ in 0..2 {
            let gate = release.clone();
            executor
                .submit(task(async move { gate.notified().await }))
                .await
                .unwrap();
        }
        assert_eq!(executor.available_permits(), 0);

        // Free one slot so the third submit acquires, then gets rejected
        release.notify_one();
        let err = executor.submit(task(async {})).await.unwrap_err();
        assert!(err.is_rejection());

        release.notify_one();
        // Both permits come back: the rejected one immediately, the other on completion
        tokio::time::timeout(Duration::from_secs(2), async {
            while executor.available_permits() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("permits should be returned");

        let stats = executor.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dispatched, 2);
    }

    #[tokio::test]
    async fn test_cancelled_wait_drops_task() {
        let executor = ImmediateBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 1).unwrap();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        executor
            .submit(task(async move { gate.notified().await }))
            .await
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let result = executor
            .submit_or_cancel(
                task(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await;
        assert_eq!(result, Err(DispatchError::InterruptedWhileWaiting));

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(executor.available_permits(), 1);
        assert_eq!(executor.stats().interrupted, 1);
    }

    #[tokio::test]
    async fn test_dropped_submit_counts_abandoned_task() {
        let executor = ImmediateBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 1).unwrap();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        executor
            .submit(task(async move { gate.notified().await }))
            .await
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            executor.submit(task(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await;
        assert!(abandoned.is_err());

        let stats = executor.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.interrupted, 1);

        release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(executor.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_shut_down_runtime_is_reported_to_submitter() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let delegate = RuntimeDelegate::new(runtime.handle().clone());
        runtime.shutdown_background();
        let executor = ImmediateBoundedExecutor::new(delegate, 1).unwrap();

        let err = executor.submit(task(async {})).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(executor.available_permits(), 1);
        let stats = executor.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dispatched, 0);
    }

    #[tokio::test]
    async fn test_submit_callable_returns_value() {
        let executor = ImmediateBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 2).unwrap();
        let handle = executor.submit_callable(async { "answer" }).await.unwrap();
        assert_eq!(handle.await, Ok("answer"));
    }

    #[tokio::test]
    async fn test_zero_parallelism_rejected() {
        let result = ImmediateBoundedExecutor::new(RuntimeDelegate::current().unwrap(), 0);
        assert_eq!(result.err(), Some(DispatchError::Configuration { parallelism: 0 }));
    }
}
