//! One-shot completion tokens that chain gate phases.
//!
//! A [`WaitPrecondition`] starts out pending and is settled exactly once,
//! either satisfied or failed. Every later settle attempt is ignored. Phase B
//! of a test holds the token of phase A and refuses to start until it
//! settles.
//!
//! ```rust
//! use request_gate_core::WaitPrecondition;
//! use std::thread;
//!
//! let phase_a = WaitPrecondition::new();
//! let observer = phase_a.clone();
//!
//! let waiter = thread::spawn(move || observer.wait().is_ok());
//! assert!(phase_a.signal());
//! assert!(!phase_a.signal());
//! assert!(waiter.join().unwrap());
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors returned while waiting on a precondition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    /// The precondition did not settle within the supplied bound.
    #[error("precondition not signaled after {waited:?}")]
    TimedOut {
        /// How long the caller waited.
        waited: Duration,
    },
    /// The owning phase failed instead of completing.
    #[error("preceding phase failed: {reason}")]
    Failed {
        /// Description of the predecessor's failure.
        reason: String,
    },
}

/// Observable state of a precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionState {
    /// Not settled yet.
    Pending,
    /// Settled successfully at the given instant.
    Satisfied(Instant),
    /// Settled with a failure.
    Failed {
        /// When the failure was recorded.
        at: Instant,
        /// Description of the failure.
        reason: String,
    },
}

struct Inner {
    state: Mutex<PreconditionState>,
    settled: Condvar,
}

/// A one-shot signal marking the end of a phase.
///
/// Cloning yields another handle to the same signal.
#[derive(Clone)]
pub struct WaitPrecondition {
    inner: Arc<Inner>,
}

impl WaitPrecondition {
    /// Creates a pending precondition.
    pub fn new() -> Self {
        Self::with_state(PreconditionState::Pending)
    }

    /// Creates a precondition that is already satisfied, used as the root of
    /// a phase chain.
    pub fn satisfied() -> Self {
        Self::with_state(PreconditionState::Satisfied(Instant::now()))
    }

    fn with_state(state: PreconditionState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                settled: Condvar::new(),
            }),
        }
    }

    /// Marks the precondition satisfied and wakes all waiters.
    ///
    /// Returns `false` without touching anything if it was already settled.
    pub fn signal(&self) -> bool {
        self.settle(PreconditionState::Satisfied(Instant::now()))
    }

    /// Marks the precondition failed and wakes all waiters.
    ///
    /// Returns `false` without touching anything if it was already settled.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.settle(PreconditionState::Failed {
            at: Instant::now(),
            reason: reason.into(),
        })
    }

    fn settle(&self, next: PreconditionState) -> bool {
        let mut state = self.inner.state.lock();
        if *state != PreconditionState::Pending {
            #[cfg(feature = "tracing")]
            tracing::trace!(?next, "precondition already settled, ignoring");
            return false;
        }
        *state = next;
        self.inner.settled.notify_all();
        true
    }

    /// Blocks until the precondition settles.
    ///
    /// Returns the instant it was satisfied, which later phases use as the
    /// start of their own clock.
    pub fn wait(&self) -> Result<Instant, PreconditionError> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = Self::outcome(&state) {
                return outcome;
            }
            self.inner.settled.wait(&mut state);
        }
    }

    /// Blocks until the precondition settles or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Instant, PreconditionError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = Self::outcome(&state) {
                return outcome;
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                        if let Some(outcome) = Self::outcome(&state) {
                            return outcome;
                        }
                        return Err(PreconditionError::TimedOut {
                            waited: started.elapsed(),
                        });
                    }
                }
                None => self.inner.settled.wait(&mut state),
            }
        }
    }

    fn outcome(state: &PreconditionState) -> Option<Result<Instant, PreconditionError>> {
        match state {
            PreconditionState::Pending => None,
            PreconditionState::Satisfied(at) => Some(Ok(*at)),
            PreconditionState::Failed { reason, .. } => Some(Err(PreconditionError::Failed {
                reason: reason.clone(),
            })),
        }
    }

    /// Returns true once the precondition settled successfully.
    pub fn is_signaled(&self) -> bool {
        matches!(*self.inner.state.lock(), PreconditionState::Satisfied(_))
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> PreconditionState {
        self.inner.state.lock().clone()
    }
}

impl Default for WaitPrecondition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitPrecondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WaitPrecondition")
            .field(&*self.inner.state.lock())
            .finish()
    }
}
