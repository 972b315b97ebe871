//! The exclusion context shared by every phase of one test.
//!
//! A [`GateScope`] owns the single mutex and condvar that guard the
//! bookkeeping of all phases created through it. It also remembers the tail
//! of the phase chain so phases can be declared one after another without
//! passing preconditions around by hand.

use crate::config::GateConfig;
use crate::error::GateError;
use crate::expectation::RequestExpectation;
use crate::gate::ConcurrencyGate;
use crate::phase::PhaseState;
use crate::policy::ReleasePolicy;
use parking_lot::{Condvar, Mutex};
use request_gate_core::WaitPrecondition;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default time a phase may stay active before it fails.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct ScopeState {
    pub(crate) phases: Vec<PhaseState>,
}

pub(crate) struct ScopeShared {
    pub(crate) state: Mutex<ScopeState>,
    pub(crate) condvar: Condvar,
}

/// Shared exclusion context for a chain of gate phases.
///
/// Cloning yields another handle to the same scope. Its lifetime is one
/// test run; nothing in it is process-global.
#[derive(Clone)]
pub struct GateScope {
    shared: Arc<ScopeShared>,
    tail: Arc<Mutex<WaitPrecondition>>,
    name: Arc<str>,
    default_timeout: Duration,
}

impl GateScope {
    /// Creates a scope with default settings.
    pub fn new() -> Self {
        GateScopeBuilder::new().build()
    }

    /// Creates a new scope builder.
    pub fn builder() -> GateScopeBuilder {
        GateScopeBuilder::new()
    }

    /// Name of the scope, used as a prefix for unnamed gates.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeout applied to gates that do not configure their own.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub(crate) fn shared(&self) -> &Arc<ScopeShared> {
        &self.shared
    }

    /// Completion token of the most recent phase declared through
    /// [`expect_concurrent`](Self::expect_concurrent) or
    /// [`expect_with`](Self::expect_with). Satisfied when no phase has been
    /// declared yet.
    pub fn tail(&self) -> WaitPrecondition {
        self.tail.lock().clone()
    }

    /// Declares a phase that releases all `expectations` together once every
    /// one of them is parked, chained after the previous phase.
    pub fn expect_concurrent<E>(&self, expectations: Vec<E>) -> ConcurrencyGate<E>
    where
        E: RequestExpectation,
    {
        self.expect_with(GateConfig::default(), expectations)
    }

    /// Declares a phase with the given release policy, chained after the
    /// previous phase.
    pub fn expect_concurrent_with<E>(
        &self,
        policy: ReleasePolicy,
        expectations: Vec<E>,
    ) -> ConcurrencyGate<E>
    where
        E: RequestExpectation,
    {
        self.expect_with(GateConfig::builder().policy(policy).build(), expectations)
    }

    /// Declares a fully configured phase, chained after the previous phase.
    pub fn expect_with<E>(&self, config: GateConfig, expectations: Vec<E>) -> ConcurrencyGate<E>
    where
        E: RequestExpectation,
    {
        let mut tail = self.tail.lock();
        let gate = ConcurrencyGate::new(self, config, tail.clone(), expectations);
        *tail = gate.completion();
        gate
    }

    /// Number of phases registered with this scope.
    pub fn phase_count(&self) -> usize {
        self.shared.state.lock().phases.len()
    }

    /// Checks every phase without blocking.
    ///
    /// Returns the first recorded failure in declaration order, or
    /// [`GateError::Incomplete`] for the first phase still in progress.
    pub fn verify(&self) -> Result<(), GateError> {
        let state = self.shared.state.lock();
        state.phases.iter().try_for_each(PhaseState::verdict)
    }
}

impl Default for GateScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateScope")
            .field("name", &self.name)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`GateScope`].
pub struct GateScopeBuilder {
    name: String,
    default_timeout: Duration,
}

impl GateScopeBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: "gate".to_string(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the scope name.
    ///
    /// Default: "gate"
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the timeout for gates that do not configure their own.
    ///
    /// Default: 60 seconds
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Builds the scope.
    pub fn build(self) -> GateScope {
        GateScope {
            shared: Arc::new(ScopeShared {
                state: Mutex::new(ScopeState { phases: Vec::new() }),
                condvar: Condvar::new(),
            }),
            tail: Arc::new(Mutex::new(WaitPrecondition::satisfied())),
            name: self.name.into(),
            default_timeout: self.default_timeout,
        }
    }
}

impl Default for GateScopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
