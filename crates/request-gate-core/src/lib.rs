//! Core infrastructure for request-gate.
//!
//! This crate provides the pieces shared by every gate flavour:
//! - [`WaitPrecondition`], the one-shot token chaining test phases
//! - The event system used for observing gates

pub mod events;
pub mod precondition;

pub use events::{EventListener, EventListeners, GateEvent};
pub use precondition::{PreconditionError, PreconditionState, WaitPrecondition};
