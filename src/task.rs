//! Task type and completion handles

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::DispatchError;

/// Opaque unit of work: no arguments, no return value
pub type Task = BoxFuture<'static, ()>;

/// Box a future into a task
pub fn task<F>(future: F) -> Task
where
    F: Future<Output = ()> + Send + 'static,
{
    future.boxed()
}

/// Wrap a synchronous closure into a task
pub fn task_fn<F>(f: F) -> Task
where
    F: FnOnce() + Send + 'static,
{
    async move { f() }.boxed()
}

/// Pair a value-returning future with a handle that receives its output
pub fn with_handle<F, T>(future: F) -> (Task, TaskHandle<T>)
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let wrapped = async move {
        let value = future.await;
        // Receiver gone means the caller stopped caring
        let _ = tx.send(value);
    };
    (wrapped.boxed(), TaskHandle { rx })
}

/// Completion handle for a value-returning submission
///
/// Resolves to the task's output, or `TaskDropped` if the task was rejected,
/// discarded at shutdown, or panicked before producing a value.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Non-waiting check for a finished result
    pub fn try_take(&mut self) -> Option<Result<T, DispatchError>> {
        match self.rx.try_recv() {
            Ok(value) => Some(Ok(value)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(DispatchError::TaskDropped)),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| DispatchError::TaskDropped))
    }
}
