//! Event types for gate phases.

use crate::error::GateError;
use request_gate_core::events::GateEvent;
use std::time::{Duration, Instant};

/// Events emitted over the lifetime of one gate phase.
#[derive(Debug, Clone)]
pub enum PhaseEvent {
    /// A request matched an expectation and is about to park.
    RequestArrived {
        /// Name of the gate.
        gate_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Requests parked after this arrival, including it.
        waiting: usize,
        /// Expected requests that have not arrived yet.
        yet_to_be_received: usize,
    },
    /// One or more parked requests were released.
    RequestsReleased {
        /// Name of the gate.
        gate_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Number of requests released by this step.
        released: usize,
        /// Requests still parked afterwards.
        waiting: usize,
    },
    /// A request was turned away as unexpected.
    UnexpectedRequest {
        /// Name of the gate.
        gate_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Debug rendering of the request.
        request: String,
    },
    /// Every expected request was released and left the gate.
    PhaseCompleted {
        /// Name of the gate.
        gate_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Time since the gate became active.
        duration: Duration,
    },
    /// The phase failed.
    PhaseFailed {
        /// Name of the gate.
        gate_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The recorded failure.
        error: GateError,
    },
}

impl GateEvent for PhaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PhaseEvent::RequestArrived { .. } => "request_arrived",
            PhaseEvent::RequestsReleased { .. } => "requests_released",
            PhaseEvent::UnexpectedRequest { .. } => "unexpected_request",
            PhaseEvent::PhaseCompleted { .. } => "phase_completed",
            PhaseEvent::PhaseFailed { .. } => "phase_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            PhaseEvent::RequestArrived { timestamp, .. }
            | PhaseEvent::RequestsReleased { timestamp, .. }
            | PhaseEvent::UnexpectedRequest { timestamp, .. }
            | PhaseEvent::PhaseCompleted { timestamp, .. }
            | PhaseEvent::PhaseFailed { timestamp, .. } => *timestamp,
        }
    }

    fn gate_name(&self) -> &str {
        match self {
            PhaseEvent::RequestArrived { gate_name, .. }
            | PhaseEvent::RequestsReleased { gate_name, .. }
            | PhaseEvent::UnexpectedRequest { gate_name, .. }
            | PhaseEvent::PhaseCompleted { gate_name, .. }
            | PhaseEvent::PhaseFailed { gate_name, .. } => gate_name,
        }
    }
}
