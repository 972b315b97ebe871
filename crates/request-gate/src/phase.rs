//! Bookkeeping for a single gate phase.
//!
//! Everything in here is only touched while the scope mutex is held.

use crate::error::GateError;
use request_gate_core::WaitPrecondition;
use std::time::{Duration, Instant};

/// Lifecycle of a gate phase.
///
/// ```text
/// Armed ──► Active ──► Satisfied ──► Closed
///   │         │
///   └─────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Waiting for the preceding phase to finish.
    Armed,
    /// Accepting arrivals, deadline running.
    Active,
    /// Every expected request has been released; some may still be leaving.
    Satisfied,
    /// Every released request has left the gate and the phase is signaled.
    Closed,
    /// The phase timed out or its predecessor failed.
    Failed,
}

impl GateState {
    /// Returns true once the phase can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, GateState::Closed | GateState::Failed)
    }
}

pub(crate) struct PhaseState {
    pub(crate) name: String,
    pub(crate) expected: usize,
    pub(crate) max_concurrent: usize,
    timeout: Duration,
    created_at: Instant,
    /// One flag per expectation, set when a request claimed it.
    claimed: Vec<bool>,
    /// Tickets handed out, one per accepted arrival.
    pub(crate) arrivals: usize,
    /// Release watermark. Tickets below it may proceed.
    pub(crate) released: usize,
    pub(crate) departed: usize,
    pub(crate) activated_at: Option<Instant>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) state: GateState,
    pub(crate) failure: Option<GateError>,
    pub(crate) completion: WaitPrecondition,
}

impl PhaseState {
    pub(crate) fn new(
        name: String,
        expected: usize,
        max_concurrent: usize,
        timeout: Duration,
        completion: WaitPrecondition,
    ) -> Self {
        Self {
            name,
            expected,
            max_concurrent,
            timeout,
            created_at: Instant::now(),
            claimed: vec![false; expected],
            arrivals: 0,
            released: 0,
            departed: 0,
            activated_at: None,
            deadline: None,
            state: GateState::Armed,
            failure: None,
            completion,
        }
    }

    /// Requests currently parked. A failed phase has let everyone go.
    pub(crate) fn waiting(&self) -> usize {
        if self.state == GateState::Failed {
            return 0;
        }
        self.arrivals - self.released
    }

    pub(crate) fn yet_to_be_received(&self) -> usize {
        self.expected - self.arrivals
    }

    /// Starts the clock once the predecessor has been satisfied.
    ///
    /// The gate's timeout runs from whichever is later: the predecessor's
    /// signal or the gate's construction. Returns true if the phase closed
    /// immediately because it expects nothing.
    pub(crate) fn activate(&mut self, predecessor_signaled_at: Instant) -> bool {
        if self.state != GateState::Armed {
            return false;
        }
        let at = predecessor_signaled_at.max(self.created_at);
        self.activated_at = Some(at);
        self.deadline = at.checked_add(self.timeout);
        self.state = GateState::Active;

        if self.expected == 0 {
            self.state = GateState::Closed;
            self.completion.signal();
            return true;
        }
        false
    }

    /// Claims the first outstanding expectation accepted by `matches`.
    pub(crate) fn claim(&mut self, matches: impl Fn(usize) -> bool) -> Option<usize> {
        let index = (0..self.expected).find(|&i| !self.claimed[i] && matches(i))?;
        self.claimed[index] = true;
        Some(index)
    }

    /// Hands out the next arrival ticket.
    pub(crate) fn admit(&mut self) -> usize {
        let ticket = self.arrivals;
        self.arrivals += 1;
        ticket
    }

    /// Moves the release watermark forward by up to `count` tickets.
    pub(crate) fn release(&mut self, count: usize) -> usize {
        let count = count.min(self.waiting());
        self.released += count;
        if self.released == self.expected && self.state == GateState::Active {
            self.state = GateState::Satisfied;
        }
        count
    }

    /// Records a released request leaving the gate. Returns true if this was
    /// the last one and the phase closed.
    pub(crate) fn depart(&mut self) -> bool {
        self.departed += 1;
        if self.state == GateState::Satisfied && self.departed == self.expected {
            self.state = GateState::Closed;
            self.completion.signal();
            return true;
        }
        false
    }

    /// Fails the phase if its deadline has passed.
    pub(crate) fn expire_if_due(&mut self, now: Instant) -> Option<GateError> {
        if self.state != GateState::Active {
            return None;
        }
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        let error = GateError::Timeout {
            gate: self.name.clone(),
            expected: self.expected,
            received: self.arrivals,
            elapsed: self.elapsed(now),
        };
        self.fail(error.clone());
        Some(error)
    }

    /// Moves the phase to `Failed`, force-releasing every parked request.
    ///
    /// Returns false if the phase had already finished one way or another.
    pub(crate) fn fail(&mut self, error: GateError) -> bool {
        if self.state.is_terminal() || self.state == GateState::Satisfied {
            self.record(error);
            return false;
        }
        self.completion.fail(error.to_string());
        self.failure = Some(error);
        self.state = GateState::Failed;
        true
    }

    /// Keeps the first failure seen without changing the lifecycle.
    pub(crate) fn record(&mut self, error: GateError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        self.activated_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    /// Outcome of the phase as seen by `verify`.
    pub(crate) fn verdict(&self) -> Result<(), GateError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.state == GateState::Closed {
            return Ok(());
        }
        Err(GateError::Incomplete {
            gate: self.name.clone(),
            expected: self.expected,
            received: self.arrivals,
        })
    }
}
