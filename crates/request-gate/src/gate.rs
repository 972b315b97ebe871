//! The concurrency gate.

use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::events::PhaseEvent;
use crate::expectation::RequestExpectation;
use crate::handler::{park, BlockingHandler, Unparked};
use crate::phase::{GateState, PhaseState};
use crate::policy::ReleasePolicy;
use crate::scope::{GateScope, ScopeShared, ScopeState};
use parking_lot::MutexGuard;
use request_gate_core::{PreconditionError, WaitPrecondition};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// How often an armed watchdog checks whether its scope is still alive.
const WATCHDOG_POLL: Duration = Duration::from_millis(100);

/// Parks inbound requests and releases them according to a [`ReleasePolicy`].
///
/// The gate expects exactly one request per expectation. Each request
/// handler thread calls [`on_request_arrived`](Self::on_request_arrived),
/// which blocks until the policy (or the test, for manual gates) releases it.
/// If the release condition is not met within the timeout the gate fails,
/// every parked request is let go with the failure, and the failure is
/// reported to whoever waits on the phase.
///
/// Cloning yields another handle to the same gate.
pub struct ConcurrencyGate<E> {
    shared: Arc<ScopeShared>,
    phase: usize,
    name: Arc<str>,
    config: Arc<GateConfig>,
    expectations: Arc<[E]>,
    previous: WaitPrecondition,
    completion: WaitPrecondition,
}

impl<E> Clone for ConcurrencyGate<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            phase: self.phase,
            name: Arc::clone(&self.name),
            config: Arc::clone(&self.config),
            expectations: Arc::clone(&self.expectations),
            previous: self.previous.clone(),
            completion: self.completion.clone(),
        }
    }
}

impl<E: RequestExpectation> ConcurrencyGate<E> {
    /// Creates a gate in `scope` that becomes active once `previous` is
    /// satisfied.
    ///
    /// The number of expected concurrent requests is `expectations.len()`.
    pub fn new(
        scope: &GateScope,
        config: GateConfig,
        previous: WaitPrecondition,
        expectations: Vec<E>,
    ) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();

        let expected = expectations.len();
        let timeout = config.timeout.unwrap_or_else(|| scope.default_timeout());
        let max_concurrent = config.policy.max_concurrent(expected);
        let completion = WaitPrecondition::new();
        let shared = Arc::clone(scope.shared());

        let (phase, name) = {
            let mut state = shared.state.lock();
            let phase = state.phases.len();
            let name = config
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", scope.name(), phase));
            state.phases.push(PhaseState::new(
                name.clone(),
                expected,
                max_concurrent,
                timeout,
                completion.clone(),
            ));
            (phase, name)
        };

        #[cfg(feature = "tracing")]
        debug!(gate = %name, expected, ?timeout, policy = ?config.policy, "gate armed");

        let gate = Self {
            shared,
            phase,
            name: name.into(),
            config: Arc::new(config),
            expectations: expectations.into(),
            previous,
            completion,
        };
        gate.spawn_watchdog();
        gate
    }

    /// Creates a gate that holds every request until all `expectations` are
    /// parked at once, then releases them together.
    pub fn expect_all_then_release(
        scope: &GateScope,
        timeout: Duration,
        previous: WaitPrecondition,
        expectations: Vec<E>,
    ) -> Self {
        let config = GateConfig::builder()
            .timeout(timeout)
            .policy(ReleasePolicy::ReleaseAllWhenFull)
            .build();
        Self::new(scope, config, previous, expectations)
    }

    /// Called by the server on the request's own handling thread.
    ///
    /// Waits for the preceding phase, matches the request against the
    /// outstanding expectations, parks until released and returns the
    /// expectation it matched. Fails with [`GateError::UnexpectedRequest`]
    /// when nothing outstanding matches, and with the phase failure when the
    /// gate times out while the request is parked.
    pub fn on_request_arrived(&self, request: &E::Request) -> Result<&E> {
        let signaled_at = self.await_predecessor()?;
        let mut events = Vec::new();
        let admitted = self.admit(request, signaled_at, &mut events);
        publish(&self.config, &events);
        let (index, ticket) = admitted?;

        events.clear();
        let parked = self.park_until_released(ticket, &mut events);
        publish(&self.config, &events);
        parked.map(|()| &self.expectations[index])
    }

    /// Counts the request and runs the release policy. Returns the claimed
    /// expectation and the request's ticket.
    fn admit(
        &self,
        request: &E::Request,
        signaled_at: Instant,
        events: &mut Vec<PhaseEvent>,
    ) -> Result<(usize, usize)> {
        let mut guard = self.shared.state.lock();
        self.activate(&mut guard, signaled_at, events);

        let state = &mut guard.phases[self.phase];
        if state.state == GateState::Failed {
            return Err(failure_of(state));
        }
        if let Some(error) = state.expire_if_due(Instant::now()) {
            self.shared.condvar.notify_all();
            events.push(failed_event(state, error.clone()));
            return Err(error);
        }

        if state.max_concurrent > 0 && state.waiting() >= state.max_concurrent {
            let error = GateError::TooManyConcurrent {
                gate: state.name.clone(),
                max_concurrent: state.max_concurrent,
            };
            state.record(error.clone());
            events.push(unexpected_event(state, request));
            return Err(error);
        }

        let expectations = &self.expectations;
        let Some(index) = state.claim(|i| expectations[i].matches(request)) else {
            let error = GateError::UnexpectedRequest {
                gate: state.name.clone(),
                expected: state.expected,
                request: format!("{request:?}"),
            };
            state.record(error.clone());
            events.push(unexpected_event(state, request));
            return Err(error);
        };

        let ticket = state.admit();
        // Wakes drivers blocked in `wait_for_all_pending_calls`.
        self.shared.condvar.notify_all();
        let yet_to_be_received = state.yet_to_be_received();
        events.push(PhaseEvent::RequestArrived {
            gate_name: state.name.clone(),
            timestamp: Instant::now(),
            waiting: state.waiting(),
            yet_to_be_received,
        });

        let mut handler = BlockingHandler::new(state);
        self.config
            .policy
            .on_expected_requests_received(&mut handler, yet_to_be_received);
        let released = handler.released();
        if released > 0 {
            events.push(released_event(state, released));
        }
        Ok((index, ticket))
    }

    fn park_until_released(&self, ticket: usize, events: &mut Vec<PhaseEvent>) -> Result<()> {
        let mut guard = self.shared.state.lock();
        match park(&mut guard, &self.shared.condvar, self.phase, ticket) {
            Unparked::Released => {
                let state = &mut guard.phases[self.phase];
                if state.depart() {
                    self.shared.condvar.notify_all();
                    events.push(completed_event(state));
                }
                Ok(())
            }
            Unparked::Failed {
                error,
                expired_here,
            } => {
                if expired_here {
                    events.push(failed_event(&guard.phases[self.phase], error.clone()));
                }
                Err(error)
            }
        }
    }

    /// Returns true if the gate releases requests without an explicit
    /// trigger from the test.
    pub fn is_auto_release(&self) -> bool {
        self.config.policy.is_auto_release()
    }
}

impl<E> ConcurrencyGate<E> {
    /// Name of the gate.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The release policy.
    pub fn policy(&self) -> ReleasePolicy {
        self.config.policy
    }

    /// Size of the expectation set.
    pub fn expected(&self) -> usize {
        self.expectations.len()
    }

    /// The expectation set, in declaration order.
    pub fn expectations(&self) -> &[E] {
        &self.expectations
    }

    /// Requests counted so far.
    pub fn received(&self) -> usize {
        self.shared.state.lock().phases[self.phase].arrivals
    }

    /// Requests currently parked.
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().phases[self.phase].waiting()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GateState {
        self.shared.state.lock().phases[self.phase].state
    }

    /// Token satisfied once this phase closes, or failed if it fails.
    ///
    /// Hand it to the next gate to chain phases.
    pub fn completion(&self) -> WaitPrecondition {
        self.completion.clone()
    }

    /// Releases the `count` longest-parked requests.
    ///
    /// Fails with [`GateError::NotEnoughWaiting`] if fewer are parked. Meant
    /// for manual gates but works on any gate.
    pub fn release(&self, count: usize) -> Result<usize> {
        self.release_with(|state| {
            let waiting = state.waiting();
            if count > waiting {
                return Err(GateError::NotEnoughWaiting {
                    gate: state.name.clone(),
                    requested: count,
                    waiting,
                });
            }
            Ok(count)
        })
    }

    /// Releases every parked request and returns how many went.
    pub fn release_all(&self) -> Result<usize> {
        self.release_with(|state| Ok(state.waiting()))
    }

    fn release_with(&self, count: impl FnOnce(&PhaseState) -> Result<usize>) -> Result<usize> {
        let mut events = Vec::new();
        let outcome = {
            let mut guard = self.shared.state.lock();
            let state = &mut guard.phases[self.phase];
            if state.state == GateState::Failed {
                return Err(failure_of(state));
            }
            let count = count(state)?;
            let released = BlockingHandler::new(state).release(count);
            if released > 0 {
                self.shared.condvar.notify_all();
                events.push(released_event(state, released));
            }
            released
        };
        publish(&self.config, &events);
        Ok(outcome)
    }

    /// Blocks until as many requests are parked as the gate will hold at
    /// once, i.e. the smaller of its concurrency bound and the number of
    /// expected requests not yet released.
    ///
    /// Returns the number of parked requests. Lets a test observe the "all
    /// blocked, nothing released" state of a manual gate before releasing.
    pub fn wait_for_all_pending_calls(&self) -> Result<usize> {
        let signaled_at = self.await_predecessor()?;
        let mut events = Vec::new();
        let outcome = {
            let mut guard = self.shared.state.lock();
            self.activate(&mut guard, signaled_at, &mut events);
            loop {
                let state = &mut guard.phases[self.phase];
                if state.state == GateState::Failed {
                    break Err(failure_of(state));
                }
                let outstanding = state.expected - state.released;
                let target = state.max_concurrent.min(outstanding);
                if state.waiting() >= target {
                    break Ok(state.waiting());
                }
                if let Some(error) = state.expire_if_due(Instant::now()) {
                    self.shared.condvar.notify_all();
                    events.push(failed_event(state, error.clone()));
                    break Err(error);
                }
                self.sleep(&mut guard);
            }
        };
        publish(&self.config, &events);
        outcome
    }

    /// Blocks until the phase closes or fails.
    ///
    /// Any failure recorded by the phase, including unexpected requests that
    /// arrived while it ran, is returned here.
    pub fn wait(&self) -> Result<()> {
        let signaled_at = self.await_predecessor()?;
        let mut events = Vec::new();
        let outcome = {
            let mut guard = self.shared.state.lock();
            self.activate(&mut guard, signaled_at, &mut events);
            loop {
                let state = &mut guard.phases[self.phase];
                match state.state {
                    GateState::Closed | GateState::Failed => break state.verdict(),
                    _ => {}
                }
                if let Some(error) = state.expire_if_due(Instant::now()) {
                    self.shared.condvar.notify_all();
                    events.push(failed_event(state, error.clone()));
                    break Err(error);
                }
                self.sleep(&mut guard);
            }
        };
        publish(&self.config, &events);
        outcome
    }

    /// Checks the phase without blocking.
    pub fn verify(&self) -> Result<()> {
        self.shared.state.lock().phases[self.phase].verdict()
    }

    /// Waits on the scope condvar, bounded by the phase deadline while the
    /// phase is active.
    fn sleep(&self, guard: &mut MutexGuard<'_, ScopeState>) {
        let state = &guard.phases[self.phase];
        match (state.state, state.deadline) {
            (GateState::Active, Some(deadline)) => {
                self.shared.condvar.wait_until(guard, deadline);
            }
            _ => self.shared.condvar.wait(guard),
        }
    }

    fn activate(
        &self,
        guard: &mut MutexGuard<'_, ScopeState>,
        signaled_at: Instant,
        events: &mut Vec<PhaseEvent>,
    ) {
        let state = &mut guard.phases[self.phase];
        if state.activate(signaled_at) {
            self.shared.condvar.notify_all();
            events.push(completed_event(state));
        }
    }

    /// Blocks until the preceding phase settles, failing this phase if it
    /// failed.
    fn await_predecessor(&self) -> Result<Instant> {
        match self.previous.wait() {
            Ok(at) => Ok(at),
            Err(PreconditionError::Failed { reason }) => Err(self.fail_from_predecessor(reason)),
            Err(error @ PreconditionError::TimedOut { .. }) => {
                Err(self.fail_from_predecessor(error.to_string()))
            }
        }
    }

    fn fail_from_predecessor(&self, reason: String) -> GateError {
        let error = GateError::PredecessorFailed {
            gate: self.name.to_string(),
            reason,
        };
        fail_phase(&self.shared, self.phase, &self.config, error.clone());
        error
    }

    fn spawn_watchdog(&self) {
        let shared = Arc::downgrade(&self.shared);
        let previous = self.previous.clone();
        let config = Arc::clone(&self.config);
        let phase = self.phase;
        let name = Arc::clone(&self.name);

        let spawned = std::thread::Builder::new()
            .name(format!("gate-watchdog-{}", self.name))
            .spawn(move || watchdog(shared, phase, name, previous, config));

        if let Err(_error) = spawned {
            // Deadlines are still enforced by every waiter on the phase.
            #[cfg(feature = "tracing")]
            warn!(gate = %self.name, error = %_error, "failed to start gate watchdog");
        }
    }
}

impl<E> fmt::Debug for ConcurrencyGate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("name", &self.name)
            .field("expected", &self.expectations.len())
            .field("policy", &self.config.policy)
            .finish_non_exhaustive()
    }
}

/// Backstop that fails the phase when its deadline passes even if no worker
/// or test thread happens to be waiting on it.
fn watchdog(
    shared: Weak<ScopeShared>,
    phase: usize,
    name: Arc<str>,
    previous: WaitPrecondition,
    config: Arc<GateConfig>,
) {
    let signaled_at = loop {
        match previous.wait_timeout(WATCHDOG_POLL) {
            Ok(at) => break at,
            Err(PreconditionError::TimedOut { .. }) => {
                if shared.strong_count() == 0 {
                    return;
                }
            }
            Err(PreconditionError::Failed { reason }) => {
                if let Some(shared) = shared.upgrade() {
                    let error = GateError::PredecessorFailed {
                        gate: name.to_string(),
                        reason,
                    };
                    fail_phase(&shared, phase, &config, error);
                }
                return;
            }
        }
    };

    let Some(shared) = shared.upgrade() else {
        return;
    };

    let mut events = Vec::new();
    {
        let mut guard = shared.state.lock();
        {
            let state = &mut guard.phases[phase];
            if state.activate(signaled_at) {
                shared.condvar.notify_all();
                events.push(completed_event(state));
            }
        }
        loop {
            let state = &mut guard.phases[phase];
            if state.state != GateState::Active {
                break;
            }
            if let Some(error) = state.expire_if_due(Instant::now()) {
                shared.condvar.notify_all();
                events.push(failed_event(state, error));
                break;
            }
            let Some(deadline) = state.deadline else {
                break;
            };
            shared.condvar.wait_until(&mut guard, deadline);
        }
    }
    publish(&config, &events);
}

fn fail_phase(shared: &ScopeShared, phase: usize, config: &GateConfig, error: GateError) {
    let event = {
        let mut guard = shared.state.lock();
        let state = &mut guard.phases[phase];
        if !state.fail(error.clone()) {
            return;
        }
        shared.condvar.notify_all();
        failed_event(state, error)
    };
    publish(config, std::slice::from_ref(&event));
}

fn failure_of(state: &PhaseState) -> GateError {
    state
        .failure
        .clone()
        .unwrap_or_else(|| GateError::WorkerAborted {
            gate: state.name.clone(),
        })
}

fn released_event(state: &PhaseState, released: usize) -> PhaseEvent {
    PhaseEvent::RequestsReleased {
        gate_name: state.name.clone(),
        timestamp: Instant::now(),
        released,
        waiting: state.waiting(),
    }
}

fn completed_event(state: &PhaseState) -> PhaseEvent {
    let now = Instant::now();
    PhaseEvent::PhaseCompleted {
        gate_name: state.name.clone(),
        timestamp: now,
        duration: state.elapsed(now),
    }
}

fn failed_event(state: &PhaseState, error: GateError) -> PhaseEvent {
    PhaseEvent::PhaseFailed {
        gate_name: state.name.clone(),
        timestamp: Instant::now(),
        error,
    }
}

fn unexpected_event<R: fmt::Debug + ?Sized>(state: &PhaseState, request: &R) -> PhaseEvent {
    PhaseEvent::UnexpectedRequest {
        gate_name: state.name.clone(),
        timestamp: Instant::now(),
        request: format!("{request:?}"),
    }
}

/// Reports events to listeners, logs and metrics. Never called with the
/// scope mutex held.
fn publish(config: &GateConfig, events: &[PhaseEvent]) {
    for event in events {
        #[cfg(feature = "tracing")]
        trace_event(event);

        #[cfg(feature = "metrics")]
        record_metrics(event);

        config.event_listeners.emit(event);
    }
}

#[cfg(feature = "tracing")]
fn trace_event(event: &PhaseEvent) {
    match event {
        PhaseEvent::RequestArrived {
            gate_name,
            waiting,
            yet_to_be_received,
            ..
        } => debug!(gate = %gate_name, waiting, yet_to_be_received, "request parked"),
        PhaseEvent::RequestsReleased {
            gate_name,
            released,
            waiting,
            ..
        } => debug!(gate = %gate_name, released, waiting, "requests released"),
        PhaseEvent::UnexpectedRequest {
            gate_name, request, ..
        } => warn!(gate = %gate_name, request = %request, "unexpected request"),
        PhaseEvent::PhaseCompleted {
            gate_name,
            duration,
            ..
        } => debug!(gate = %gate_name, ?duration, "phase completed"),
        PhaseEvent::PhaseFailed {
            gate_name, error, ..
        } => warn!(gate = %gate_name, %error, "phase failed"),
    }
}

#[cfg(feature = "metrics")]
fn record_metrics(event: &PhaseEvent) {
    match event {
        PhaseEvent::RequestArrived {
            gate_name, waiting, ..
        } => {
            counter!("request_gate_arrivals_total", "gate" => gate_name.clone()).increment(1);
            gauge!("request_gate_waiting", "gate" => gate_name.clone()).set(*waiting as f64);
        }
        PhaseEvent::RequestsReleased {
            gate_name,
            released,
            waiting,
            ..
        } => {
            counter!("request_gate_releases_total", "gate" => gate_name.clone())
                .increment(*released as u64);
            gauge!("request_gate_waiting", "gate" => gate_name.clone()).set(*waiting as f64);
        }
        PhaseEvent::UnexpectedRequest { gate_name, .. } => {
            counter!("request_gate_unexpected_requests_total", "gate" => gate_name.clone())
                .increment(1);
        }
        PhaseEvent::PhaseCompleted { gate_name, .. } => {
            counter!("request_gate_phases_completed_total", "gate" => gate_name.clone())
                .increment(1);
        }
        PhaseEvent::PhaseFailed { gate_name, .. } => {
            counter!("request_gate_failures_total", "gate" => gate_name.clone()).increment(1);
            gauge!("request_gate_waiting", "gate" => gate_name.clone()).set(0.0);
        }
    }
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "request_gate_arrivals_total",
            "Total number of requests counted and parked by a gate"
        );
        describe_counter!(
            "request_gate_releases_total",
            "Total number of parked requests released by a gate"
        );
        describe_counter!(
            "request_gate_unexpected_requests_total",
            "Total number of requests no outstanding expectation accepted"
        );
        describe_counter!(
            "request_gate_phases_completed_total",
            "Total number of gate phases that closed normally"
        );
        describe_counter!(
            "request_gate_failures_total",
            "Total number of gate phases that failed"
        );
        describe_gauge!("request_gate_waiting", "Requests currently parked in a gate");
    });
}
