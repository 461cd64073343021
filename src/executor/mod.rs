//! Bounded executors
//!
//! Four ways of pushing tasks through a shared [`Delegate`] while keeping at
//! most `parallelism` of them running:
//!
//! - [`ImmediateBoundedExecutor`] - submitter waits for a permit (backpressure)
//! - [`QueuedBoundedExecutor`] - non-blocking FIFO queue, drained on completion
//! - [`ScheduledQueuedBoundedExecutor`] - non-blocking queue, drained by a scheduler task
//! - [`SerialDispatcher`] - one task at a time, in submission order

mod handoff;
mod immediate;
mod queued;
mod scheduled;
mod serial;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::delegate::Delegate;
use crate::error::DispatchError;
use crate::stats::{DispatchStats, StatsRecorder};
use crate::task::Task;

pub use immediate::ImmediateBoundedExecutor;
pub use queued::QueuedBoundedExecutor;
pub use scheduled::{SchedulerState, ScheduledQueuedBoundedExecutor};
pub use serial::SerialDispatcher;

/// Callback for rejections that happen away from the submitter
pub type RejectionHook = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Which executor variant to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Immediate,
    #[default]
    Queued,
    Scheduled,
    Serial,
}

impl ExecutorKind {
    /// All variants, in documentation order
    pub const ALL: [ExecutorKind; 4] = [Self::Immediate, Self::Queued, Self::Scheduled, Self::Serial];
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Queued => write!(f, "queued"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "queued" => Ok(Self::Queued),
            "scheduled" => Ok(Self::Scheduled),
            "serial" => Ok(Self::Serial),
            _ => Err(format!(
                "Unknown executor: {}. Use: immediate, queued, scheduled, or serial",
                s
            )),
        }
    }
}

/// Common submission surface over all bounded executors
#[async_trait]
pub trait Executor: Send + Sync {
    /// Variant of this executor
    fn kind(&self) -> ExecutorKind;

    /// Submit a task
    ///
    /// Only the immediate variant waits here and reports delegate rejections;
    /// the queued variants return as soon as the task is enqueued.
    async fn execute(&self, task: Task) -> Result<(), DispatchError>;

    /// Tasks waiting for admission
    fn queue_depth(&self) -> usize;

    /// Snapshot of dispatch counters
    fn stats(&self) -> DispatchStats;
}

/// Build any executor variant behind a trait object
///
/// The serial variant always runs with a bound of one.
pub fn build_executor(
    kind: ExecutorKind,
    delegate: Arc<dyn Delegate>,
    parallelism: usize,
) -> Result<Arc<dyn Executor>, DispatchError> {
    debug!(%kind, %parallelism, "build_executor: called");
    let executor: Arc<dyn Executor> = match kind {
        ExecutorKind::Immediate => Arc::new(ImmediateBoundedExecutor::new(delegate, parallelism)?),
        ExecutorKind::Queued => Arc::new(QueuedBoundedExecutor::new(delegate, parallelism)?),
        ExecutorKind::Scheduled => Arc::new(ScheduledQueuedBoundedExecutor::new(delegate, parallelism)?),
        ExecutorKind::Serial => Arc::new(SerialDispatcher::new(delegate, parallelism)?),
    };
    Ok(executor)
}

/// Log and report a rejection nobody is waiting on
fn report_rejection(err: &DispatchError, hook: Option<&RejectionHook>) {
    warn!(error = %err, "Delegate rejected queued task, task dropped");
    if let Some(hook) = hook {
        hook(err);
    }
}

/// Log and count a task the delegate accepted but dropped before it ran
fn report_unstarted_drop(stats: &StatsRecorder) {
    warn!("Delegate dropped an accepted task before it ran");
    stats.dropped();
}
