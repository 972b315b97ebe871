//! Gated service implementation.

use crate::error::GateError;
use crate::expectation::RequestExpectation;
use crate::gate::ConcurrencyGate;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower_service::Service;

#[cfg(feature = "tracing")]
use tracing::debug;

/// Service that routes every request through a [`ConcurrencyGate`] before
/// handing it to the inner service.
///
/// The gate blocks the calling thread, so arrivals run on tokio's blocking
/// pool and the async executor stays free while requests are parked.
pub struct Gated<S, E> {
    inner: S,
    gate: ConcurrencyGate<E>,
}

impl<S: Clone, E> Clone for Gated<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<S, E> Gated<S, E> {
    /// Creates a new gated service.
    pub(crate) fn new(inner: S, gate: ConcurrencyGate<E>) -> Self {
        Self { inner, gate }
    }

    /// The gate requests pass through.
    pub fn gate(&self) -> &ConcurrencyGate<E> {
        &self.gate
    }
}

impl<S, E> Service<E::Request> for Gated<S, E>
where
    E: RequestExpectation + 'static,
    E::Request: Sized + Send + 'static,
    S: Service<E::Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: From<GateError> + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: E::Request) -> Self::Future {
        let gate = self.gate.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let gate_name = gate.name().to_string();
            let (request, admitted) = tokio::task::spawn_blocking(move || {
                let admitted = gate.on_request_arrived(&request).map(|_| ());
                (request, admitted)
            })
            .await
            .map_err(|_| GateError::WorkerAborted {
                gate: gate_name.clone(),
            })?;
            admitted?;

            #[cfg(feature = "tracing")]
            debug!(gate = %gate_name, "request released to inner service");

            inner.call(request).await
        })
    }
}
