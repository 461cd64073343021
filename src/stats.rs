//! Per-executor dispatch statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of an executor's counters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub interrupted: u64,
    pub running: usize,
    pub peak_running: usize,
}

/// Lock-free counters behind `DispatchStats`
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    interrupted: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl StatsRecorder {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    /// A task body started on the delegate
    pub(crate) fn started(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
    }

    /// A task body finished, normally or by panic
    pub(crate) fn finished(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            running: self.running.load(Ordering::SeqCst),
            peak_running: self.peak_running.load(Ordering::SeqCst),
        }
    }
}

/// Marks a task body as running until dropped
pub(crate) struct RunningGuard<'a> {
    stats: &'a StatsRecorder,
}

impl<'a> RunningGuard<'a> {
    pub(crate) fn enter(stats: &'a StatsRecorder) -> Self {
        stats.started();
        Self { stats }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.stats.finished();
    }
}
