//! Concurrent-request release gates for mock servers.
//!
//! A gate sits between a mock server's request handler threads and the code
//! that produces responses. Each expected request parks inside the gate until
//! the gate's [`ReleasePolicy`] lets it through, which makes it possible to
//! assert that a client really issues requests in parallel: with
//! [`ReleasePolicy::ReleaseAllWhenFull`] nothing proceeds until every
//! expected request is parked at the same time, so a client that serializes
//! its requests makes the gate time out instead of passing.
//!
//! # Basic Example
//!
//! ```rust
//! use request_gate::{AnyRequest, GateScope};
//! use std::thread;
//! use std::time::Duration;
//!
//! let scope = GateScope::builder()
//!     .name("download")
//!     .default_timeout(Duration::from_secs(5))
//!     .build();
//!
//! // Three requests must be in flight at once.
//! let gate = scope.expect_concurrent(AnyRequest::<&'static str>::times(3));
//!
//! let workers: Vec<_> = ["/a", "/b", "/c"]
//!     .into_iter()
//!     .map(|path| {
//!         let gate = gate.clone();
//!         thread::spawn(move || gate.on_request_arrived(&path).map(|_| ()))
//!     })
//!     .collect();
//!
//! for worker in workers {
//!     worker.join().unwrap().unwrap();
//! }
//! gate.wait().unwrap();
//! ```
//!
//! # Chained Phases
//!
//! Phases declared through the same [`GateScope`] run one after another: a
//! request for phase two that shows up early is held back until phase one
//! has closed.
//!
//! ```rust
//! use request_gate::{Exact, GateScope, ReleasePolicy};
//!
//! let scope = GateScope::new();
//! let listing = scope.expect_concurrent(vec![Exact("/index")]);
//! let files = scope.expect_concurrent_with(
//!     ReleasePolicy::ReleaseIncrementally { max_concurrent: 2 },
//!     vec![Exact("/1"), Exact("/2"), Exact("/3"), Exact("/4")],
//! );
//! # drop((listing, files));
//! ```
//!
//! # Manual Release
//!
//! A manual gate never releases on its own, so a test can look at the server
//! while every request is blocked:
//!
//! ```rust
//! use request_gate::{AnyRequest, GateScope, ReleasePolicy};
//! use std::thread;
//!
//! let scope = GateScope::new();
//! let gate = scope.expect_concurrent_with(
//!     ReleasePolicy::ManualRelease { max_concurrent: None },
//!     AnyRequest::<u32>::times(2),
//! );
//!
//! let workers: Vec<_> = (0..2)
//!     .map(|id| {
//!         let gate = gate.clone();
//!         thread::spawn(move || gate.on_request_arrived(&id).is_ok())
//!     })
//!     .collect();
//!
//! assert_eq!(gate.wait_for_all_pending_calls().unwrap(), 2);
//! // ... inspect the client while both requests hang ...
//! gate.release_all().unwrap();
//! for worker in workers {
//!     assert!(worker.join().unwrap());
//! }
//! ```
//!
//! # Error Handling
//!
//! Every failure surfaces as a [`GateError`]: parked workers get it back from
//! [`ConcurrencyGate::on_request_arrived`], and the test thread gets it from
//! [`ConcurrencyGate::wait`], [`ConcurrencyGate::verify`] or
//! [`GateScope::verify`]. Requests that match no outstanding expectation are
//! recorded against the gate even after it has closed.

pub mod config;
pub mod error;
pub mod events;
pub mod expectation;
pub mod gate;
pub mod handler;
pub mod layer;
pub(crate) mod phase;
pub mod policy;
pub mod scope;
pub mod service;

pub use config::{GateConfig, GateConfigBuilder};
pub use error::{GateError, Result};
pub use events::PhaseEvent;
pub use expectation::{AnyRequest, Exact, RequestExpectation};
pub use gate::ConcurrencyGate;
pub use handler::BlockingHandler;
pub use layer::GateLayer;
pub use phase::GateState;
pub use policy::ReleasePolicy;
pub use request_gate_core::{PreconditionError, PreconditionState, WaitPrecondition};
pub use scope::{GateScope, GateScopeBuilder, DEFAULT_TIMEOUT};
pub use service::Gated;
