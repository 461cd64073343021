//! Synthetic load runner behind `taskgate run`

use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::delegate::{Delegate, RuntimeDelegate};
use crate::executor::{Executor, ExecutorKind, build_executor};
use crate::stats::DispatchStats;
use crate::task::with_handle;

/// Outcome of a synthetic run
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub variant: ExecutorKind,
    pub parallelism: usize,
    pub tasks: usize,
    pub task_ms: u64,
    pub elapsed_ms: u64,
    /// Tasks whose completion handle resolved with a value
    pub finished: usize,
    pub stats: DispatchStats,
}

/// Push `tasks` sleeping tasks through a freshly built executor and wait for them
pub async fn run_load(variant: ExecutorKind, parallelism: usize, tasks: usize, task_time: Duration) -> Result<LoadReport> {
    debug!(%variant, %parallelism, %tasks, ?task_time, "run_load: called");
    let delegate: Arc<dyn Delegate> = Arc::new(RuntimeDelegate::current()?);
    let executor = build_executor(variant, delegate, parallelism).context("Failed to build executor")?;

    let (finished, elapsed, stats) = drive(executor.as_ref(), tasks, task_time).await?;
    info!(
        %variant,
        elapsed_ms = elapsed.as_millis() as u64,
        peak_running = stats.peak_running,
        "Synthetic load complete"
    );

    Ok(LoadReport {
        variant,
        parallelism,
        tasks,
        task_ms: task_time.as_millis() as u64,
        elapsed_ms: elapsed.as_millis() as u64,
        finished,
        stats,
    })
}

async fn drive(executor: &dyn Executor, tasks: usize, task_time: Duration) -> Result<(usize, Duration, DispatchStats)> {
    let start = Instant::now();
    let mut handles = Vec::with_capacity(tasks);

    for _ in 0..tasks {
        let (task, handle) = with_handle(tokio::time::sleep(task_time));
        executor.execute(task).await.context("Failed to submit task")?;
        handles.push(handle);
    }
    debug!(queued = executor.queue_depth(), "drive: all tasks submitted");

    let mut finished = 0;
    for handle in handles {
        if handle.await.is_ok() {
            finished += 1;
        }
    }

    Ok((finished, start.elapsed(), executor.stats()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_load_every_variant() {
        for variant in ExecutorKind::ALL {
            let report = run_load(variant, 2, 6, Duration::from_millis(5)).await.unwrap();
            assert_eq!(report.finished, 6, "{variant}");
            assert_eq!(report.stats.submitted, 6);
            assert!(report.stats.peak_running <= 2);
        }
    }

    #[tokio::test]
    async fn test_run_load_rejects_zero_parallelism() {
        assert!(run_load(ExecutorKind::Queued, 0, 1, Duration::ZERO).await.is_err());
    }
}
