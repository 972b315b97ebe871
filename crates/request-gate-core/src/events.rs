//! Observing gate phases.
//!
//! A phase reports arrivals, releases, unexpected requests and its final
//! outcome as events. Test code subscribes with plain closures and never
//! touches the scope lock: gates collect events while they hold it and hand
//! them to [`EventListeners::emit`] once it is released.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// An event emitted by a gate phase.
pub trait GateEvent: Send + Sync + fmt::Debug {
    /// Stable snake_case kind, used as a log and metrics field.
    fn event_type(&self) -> &'static str;

    /// When the event happened.
    fn timestamp(&self) -> Instant;

    /// Gate that emitted the event.
    fn gate_name(&self) -> &str;
}

/// Receives gate events.
///
/// Implemented for every `Fn(&E) + Send + Sync` closure, so most callers
/// never name this trait.
pub trait EventListener<E>: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Listeners attached to one gate, called in registration order.
///
/// Clones share the listeners themselves.
pub struct EventListeners<E> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: GateEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Subscribes `listener` to every later event.
    pub fn add(&mut self, listener: impl EventListener<E> + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// Calls every listener with `event` and returns how many of them
    /// panicked.
    ///
    /// A panic in one listener is caught; the others still run and the
    /// gate keeps working.
    pub fn emit(&self, event: &E) -> usize {
        let panicked = self
            .listeners
            .iter()
            .filter(|listener| catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err())
            .count();

        #[cfg(feature = "tracing")]
        if panicked > 0 {
            tracing::warn!(
                gate = event.gate_name(),
                event = event.event_type(),
                panicked,
                "gate event listener panicked"
            );
        }

        panicked
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E> Clone for EventListeners<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E: GateEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}
