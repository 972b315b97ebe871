//! Release policies.

use crate::handler::BlockingHandler;

/// Decides when parked requests are let through.
///
/// Each variant supplies a single decision, evaluated under the scope mutex
/// after every arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Hold every request until the whole expectation set is parked, then
    /// release them together.
    ///
    /// Any serialization by the client under test makes the gate time out
    /// instead of passing.
    #[default]
    ReleaseAllWhenFull,
    /// Release the parked batch whenever `max_concurrent` requests are
    /// parked, or when the last expected request has arrived.
    ReleaseIncrementally {
        /// Batch size.
        max_concurrent: usize,
    },
    /// Never release on its own. The test calls
    /// [`ConcurrencyGate::release`](crate::ConcurrencyGate::release) or
    /// [`ConcurrencyGate::release_all`](crate::ConcurrencyGate::release_all).
    ManualRelease {
        /// Bound on parked requests. `None` means the whole expectation set.
        max_concurrent: Option<usize>,
    },
}

impl ReleasePolicy {
    /// Returns true if the gate releases without an external trigger.
    pub fn is_auto_release(&self) -> bool {
        !matches!(self, ReleasePolicy::ManualRelease { .. })
    }

    /// Concurrency bound for a gate expecting `expected` requests.
    pub fn max_concurrent(&self, expected: usize) -> usize {
        match *self {
            ReleasePolicy::ReleaseAllWhenFull => expected,
            ReleasePolicy::ReleaseIncrementally { max_concurrent } => {
                max_concurrent.clamp(1, expected.max(1))
            }
            ReleasePolicy::ManualRelease { max_concurrent } => max_concurrent
                .map(|max| max.clamp(1, expected.max(1)))
                .unwrap_or(expected),
        }
    }

    /// Called under the scope mutex every time a request has been counted.
    pub fn on_expected_requests_received(
        &self,
        handler: &mut BlockingHandler<'_>,
        yet_to_be_received: usize,
    ) {
        match *self {
            ReleasePolicy::ReleaseAllWhenFull => {
                if yet_to_be_received == 0 {
                    handler.release_all();
                }
            }
            ReleasePolicy::ReleaseIncrementally { .. } => {
                if handler.waiting() >= handler.max_concurrent() || yet_to_be_received == 0 {
                    handler.release_all();
                }
            }
            ReleasePolicy::ManualRelease { .. } => {}
        }
    }
}
