//! Hand-off record between an executor and the wrapper it gives the delegate
//!
//! A delegate may drop a wrapper without ever polling it: synchronously inside
//! `dispatch`, or later when its runtime shuts down. The wrapper's drop guard
//! and the dispatching executor both report to a shared `Handoff`, and exactly
//! one of them runs the follow-up (counting, draining, advancing). The guard
//! never takes the executor's lock while the executor is still inside its own
//! `dispatch` call.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The executor is inside `Delegate::dispatch`
    Dispatching,
    /// `dispatch` accepted the wrapper; its guard owns the follow-up
    Accepted,
    /// The wrapper was dropped before `dispatch` returned
    GoneDuringDispatch { started: bool },
    Settled,
}

#[derive(Debug)]
pub(super) struct Handoff {
    phase: Mutex<Phase>,
}

impl Handoff {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Dispatching),
        })
    }

    /// Called by the wrapper's guard when it drops
    ///
    /// Returns true when the guard must run the follow-up itself. False means
    /// the executor is still in `dispatch` and picks it up in `settle`.
    pub(super) fn wrapper_gone(&self, started: bool) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Dispatching => {
                *phase = Phase::GoneDuringDispatch { started };
                false
            }
            Phase::Accepted => {
                *phase = Phase::Settled;
                true
            }
            Phase::GoneDuringDispatch { .. } | Phase::Settled => false,
        }
    }

    /// Called by the executor once `Delegate::dispatch` returned `result`
    ///
    /// A wrapper dropped unstarted inside `dispatch` is a rejection even if
    /// the delegate returned `Ok`. `Ok(true)` means the body already ran to
    /// completion and its guard left the follow-up to the executor.
    pub(super) fn settle(&self, result: Result<(), DispatchError>) -> Result<bool, DispatchError> {
        let mut phase = self.phase.lock();
        let gone = match *phase {
            Phase::GoneDuringDispatch { started } => Some(started),
            _ => None,
        };
        *phase = Phase::Settled;

        match (result, gone) {
            (Err(e), _) => Err(e),
            (Ok(()), None) => {
                *phase = Phase::Accepted;
                Ok(false)
            }
            (Ok(()), Some(true)) => Ok(true),
            (Ok(()), Some(false)) => Err(DispatchError::rejected("delegate dropped the task before it ran")),
        }
    }
}
