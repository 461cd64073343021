//! taskgate - bounded-concurrency task dispatch
//!
//! taskgate accepts an unbounded stream of tasks and runs them through a
//! shared, externally owned [`Delegate`] (usually a tokio runtime) while
//! never letting more than `parallelism` of them run at once.
//!
//! # Core Concepts
//!
//! - **Admission gate**: a FIFO counting semaphore; permits travel with the
//!   dispatched task and come back when it finishes, even by panic
//! - **Backpressure or buffering**: the immediate executor makes submitters
//!   wait; the queued variants buffer without bound and never block them
//! - **Ordering**: queued and serial dispatch in submission order; scheduled
//!   admits in submission order
//! - **Late rejections**: only the immediate executor reports delegate
//!   rejections to the submitter; the others log, count and hand them to an
//!   optional hook
//!
//! # Modules
//!
//! - [`gate`] - admission gate and permits
//! - [`executor`] - the four bounded executors and the [`Executor`] trait
//! - [`delegate`] - delegate trait and the tokio runtime delegate
//! - [`task`] - task type and completion handles
//! - [`future`] - single-assignment blocking future
//! - [`stats`] - dispatch counters
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod delegate;
pub mod error;
pub mod executor;
pub mod future;
pub mod gate;
pub mod load;
pub mod stats;
pub mod task;

// Re-export commonly used types
pub use config::{Config, DispatchConfig, LoadConfig};
pub use delegate::{Delegate, RuntimeDelegate};
pub use error::DispatchError;
pub use executor::{
    Executor, ExecutorKind, ImmediateBoundedExecutor, QueuedBoundedExecutor, RejectionHook,
    ScheduledQueuedBoundedExecutor, SchedulerState, SerialDispatcher, build_executor,
};
pub use future::SyncFuture;
pub use gate::{AdmissionGate, Permit};
pub use stats::DispatchStats;
pub use task::{Task, TaskHandle, task, task_fn, with_handle};
