//! Configuration for a single gate phase.

use crate::error::GateError;
use crate::events::PhaseEvent;
use crate::policy::ReleasePolicy;
use request_gate_core::events::EventListeners;
use std::time::Duration;

/// Configuration for one gate phase.
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Name of the gate, used in errors, logs and metrics.
    pub(crate) name: Option<String>,
    /// Time allowed from activation until the release condition is met.
    pub(crate) timeout: Option<Duration>,
    /// Release policy.
    pub(crate) policy: ReleasePolicy,
    /// Event listeners.
    pub(crate) event_listeners: EventListeners<PhaseEvent>,
}

impl GateConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> GateConfigBuilder {
        GateConfigBuilder::new()
    }

    /// Returns the configured release policy.
    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfigBuilder::new().build()
    }
}

/// Builder for [`GateConfig`].
pub struct GateConfigBuilder {
    name: Option<String>,
    timeout: Option<Duration>,
    policy: ReleasePolicy,
    event_listeners: EventListeners<PhaseEvent>,
}

impl GateConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: None,
            timeout: None,
            policy: ReleasePolicy::default(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the name of this gate.
    ///
    /// Default: the scope name followed by the phase index, e.g. `"test-0"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets how long the gate may stay active before it fails.
    ///
    /// The clock starts when the preceding phase completes, not when the
    /// first request arrives.
    ///
    /// Default: the scope's default timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the release policy.
    ///
    /// Default: [`ReleasePolicy::ReleaseAllWhenFull`]
    pub fn policy(mut self, policy: ReleasePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Registers a callback when a request is counted and about to park.
    ///
    /// # Callback Signature
    /// `Fn(usize, usize)` - Called with the number of parked requests
    /// (including this one) and the number of expected requests that have
    /// not arrived yet.
    ///
    /// # Example
    /// ```rust
    /// use request_gate::GateConfig;
    ///
    /// let config = GateConfig::builder()
    ///     .on_request_arrived(|waiting, outstanding| {
    ///         println!("{waiting} parked, {outstanding} still to come");
    ///     })
    ///     .build();
    /// ```
    pub fn on_request_arrived<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &PhaseEvent| {
            if let PhaseEvent::RequestArrived {
                waiting,
                yet_to_be_received,
                ..
            } = event
            {
                f(*waiting, *yet_to_be_received);
            }
        });
        self
    }

    /// Registers a callback when parked requests are released.
    ///
    /// # Callback Signature
    /// `Fn(usize)` - Called with the number of requests released in one step.
    pub fn on_requests_released<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &PhaseEvent| {
            if let PhaseEvent::RequestsReleased { released, .. } = event {
                f(*released);
            }
        });
        self
    }

    /// Registers a callback when a request is turned away as unexpected.
    ///
    /// # Callback Signature
    /// `Fn(&str)` - Called with the debug rendering of the request.
    pub fn on_unexpected_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &PhaseEvent| {
            if let PhaseEvent::UnexpectedRequest { request, .. } = event {
                f(request);
            }
        });
        self
    }

    /// Registers a callback when every expected request has been released and
    /// has left the gate.
    ///
    /// # Callback Signature
    /// `Fn(Duration)` - Called with the time since the gate became active.
    pub fn on_phase_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &PhaseEvent| {
            if let PhaseEvent::PhaseCompleted { duration, .. } = event {
                f(*duration);
            }
        });
        self
    }

    /// Registers a callback when the phase fails.
    ///
    /// # Callback Signature
    /// `Fn(&GateError)` - Called with the failure, typically a timeout.
    ///
    /// # Example
    /// ```rust
    /// use request_gate::GateConfig;
    ///
    /// let config = GateConfig::builder()
    ///     .on_phase_failed(|error| {
    ///         if error.is_timeout() {
    ///             eprintln!("client never reached full concurrency: {error}");
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn on_phase_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&GateError) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &PhaseEvent| {
            if let PhaseEvent::PhaseFailed { error, .. } = event {
                f(error);
            }
        });
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> GateConfig {
        GateConfig {
            name: self.name,
            timeout: self.timeout,
            policy: self.policy,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for GateConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
