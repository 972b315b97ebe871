//! Error types for request gates.

use std::time::Duration;

/// Failures a gate reports to worker threads and to the test driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The release condition was not met before the deadline.
    #[error(
        "gate '{gate}' timed out after {elapsed:?}: expected {expected} concurrent requests, received {received}"
    )]
    Timeout {
        /// Name of the gate.
        gate: String,
        /// Size of the expectation set.
        expected: usize,
        /// Requests that had arrived when the deadline passed.
        received: usize,
        /// Time since the gate became active.
        elapsed: Duration,
    },
    /// A request arrived that no outstanding expectation accepts.
    #[error("gate '{gate}' received an unexpected request {request} (expected {expected} requests)")]
    UnexpectedRequest {
        /// Name of the gate.
        gate: String,
        /// Size of the expectation set.
        expected: usize,
        /// Debug rendering of the offending request.
        request: String,
    },
    /// A request arrived while the maximum number of requests was parked.
    #[error("gate '{gate}' already holds the maximum of {max_concurrent} concurrent requests")]
    TooManyConcurrent {
        /// Name of the gate.
        gate: String,
        /// Configured concurrency bound.
        max_concurrent: usize,
    },
    /// The test asked to release more requests than are parked.
    #[error("gate '{gate}' cannot release {requested} requests, only {waiting} are waiting")]
    NotEnoughWaiting {
        /// Name of the gate.
        gate: String,
        /// Requests the caller asked to release.
        requested: usize,
        /// Requests actually parked.
        waiting: usize,
    },
    /// The preceding phase failed, so this one can never start.
    #[error("gate '{gate}' cannot start: {reason}")]
    PredecessorFailed {
        /// Name of the gate.
        gate: String,
        /// Failure reported by the preceding phase.
        reason: String,
    },
    /// The gate was checked before all of its expected requests went through.
    #[error("gate '{gate}' is incomplete: received {received} of {expected} expected requests")]
    Incomplete {
        /// Name of the gate.
        gate: String,
        /// Size of the expectation set.
        expected: usize,
        /// Requests received so far.
        received: usize,
    },
    /// The blocking task that parked a request panicked or was cancelled.
    #[error("gate '{gate}' lost a worker while it was parked")]
    WorkerAborted {
        /// Name of the gate.
        gate: String,
    },
}

impl GateError {
    /// Returns true if this is a timeout failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GateError::Timeout { .. })
    }

    /// Returns true if a request arrived that the gate did not expect.
    pub fn is_unexpected_request(&self) -> bool {
        matches!(
            self,
            GateError::UnexpectedRequest { .. } | GateError::TooManyConcurrent { .. }
        )
    }

    /// Returns the name of the gate that produced this error.
    pub fn gate(&self) -> &str {
        match self {
            GateError::Timeout { gate, .. }
            | GateError::UnexpectedRequest { gate, .. }
            | GateError::TooManyConcurrent { gate, .. }
            | GateError::NotEnoughWaiting { gate, .. }
            | GateError::PredecessorFailed { gate, .. }
            | GateError::Incomplete { gate, .. }
            | GateError::WorkerAborted { gate } => gate,
        }
    }
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
