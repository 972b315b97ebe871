//! Parking and releasing request-handling threads.
//!
//! Every admitted worker gets a ticket, and a release only moves the phase's
//! watermark forward under the scope mutex. A worker re-checks its ticket
//! against the watermark each time it holds the mutex, so a release that
//! lands before it starts waiting is never lost.

use crate::error::GateError;
use crate::phase::{GateState, PhaseState};
use crate::scope::ScopeState;
use parking_lot::{Condvar, MutexGuard};
use std::time::Instant;

/// Release handle passed to a [`ReleasePolicy`](crate::ReleasePolicy).
///
/// Releases are granted in arrival order: `release(2)` lets the two
/// longest-parked requests through.
pub struct BlockingHandler<'a> {
    phase: &'a mut PhaseState,
    released: usize,
}

impl<'a> BlockingHandler<'a> {
    pub(crate) fn new(phase: &'a mut PhaseState) -> Self {
        Self {
            phase,
            released: 0,
        }
    }

    /// Requests currently parked.
    pub fn waiting(&self) -> usize {
        self.phase.waiting()
    }

    /// Upper bound on simultaneously parked requests for this gate.
    pub fn max_concurrent(&self) -> usize {
        self.phase.max_concurrent
    }

    /// Releases up to `count` parked requests and returns how many went.
    pub fn release(&mut self, count: usize) -> usize {
        let released = self.phase.release(count);
        self.released += released;
        released
    }

    /// Releases every parked request.
    pub fn release_all(&mut self) -> usize {
        let waiting = self.phase.waiting();
        self.release(waiting)
    }

    /// Total released through this handle.
    pub(crate) fn released(&self) -> usize {
        self.released
    }
}

/// How a parked worker left the gate.
pub(crate) enum Unparked {
    /// Its ticket was released.
    Released,
    /// The phase failed while it was parked. Carries the failure and, if this
    /// worker was the one to notice the deadline, the fresh timeout.
    Failed {
        error: GateError,
        expired_here: bool,
    },
}

/// Blocks the calling worker until `ticket` is released or the phase fails.
///
/// Must be entered with the scope mutex held.
pub(crate) fn park(
    guard: &mut MutexGuard<'_, ScopeState>,
    condvar: &Condvar,
    phase: usize,
    ticket: usize,
) -> Unparked {
    loop {
        let deadline = {
            let state = &mut guard.phases[phase];
            if ticket < state.released {
                return Unparked::Released;
            }
            if state.state == GateState::Failed {
                let error = state
                    .failure
                    .clone()
                    .unwrap_or_else(|| GateError::WorkerAborted {
                        gate: state.name.clone(),
                    });
                return Unparked::Failed {
                    error,
                    expired_here: false,
                };
            }
            if let Some(error) = state.expire_if_due(Instant::now()) {
                condvar.notify_all();
                return Unparked::Failed {
                    error,
                    expired_here: true,
                };
            }
            state.deadline
        };

        match deadline {
            Some(deadline) => {
                condvar.wait_until(guard, deadline);
            }
            None => condvar.wait(guard),
        }
    }
}
