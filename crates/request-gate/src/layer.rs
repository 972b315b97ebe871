//! Tower layer implementation for request gates.

use crate::gate::ConcurrencyGate;
use crate::service::Gated;
use tower::Layer;

/// Layer that puts a [`ConcurrencyGate`] in front of a mock server's handler.
///
/// # Examples
///
/// ```
/// use request_gate::{AnyRequest, GateLayer, GateScope};
/// use tower::ServiceBuilder;
///
/// let scope = GateScope::new();
/// let gate = scope.expect_concurrent(AnyRequest::<String>::times(2));
///
/// let service = ServiceBuilder::new()
///     .layer(GateLayer::new(gate))
///     .service_fn(|path: String| async move { Ok::<_, request_gate::GateError>(path) });
/// # drop(service);
/// ```
pub struct GateLayer<E> {
    gate: ConcurrencyGate<E>,
}

impl<E> GateLayer<E> {
    /// Creates a layer that routes requests through `gate`.
    pub fn new(gate: ConcurrencyGate<E>) -> Self {
        Self { gate }
    }
}

impl<E> Clone for GateLayer<E> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
        }
    }
}

impl<S, E> Layer<S> for GateLayer<E> {
    type Service = Gated<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        Gated::new(service, self.gate.clone())
    }
}
