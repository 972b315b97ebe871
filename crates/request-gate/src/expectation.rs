//! Descriptions of the requests a gate expects.

use std::fmt;
use std::marker::PhantomData;

/// One anticipated inbound request.
///
/// The gate only asks whether an inbound request satisfies the expectation;
/// response policy and anything else stay with the implementor.
pub trait RequestExpectation: fmt::Debug + Send + Sync {
    /// The request type the mock server hands to the gate.
    type Request: fmt::Debug + ?Sized;

    /// Returns true if `request` satisfies this expectation.
    fn matches(&self, request: &Self::Request) -> bool;
}

impl<T: RequestExpectation + ?Sized> RequestExpectation for Box<T> {
    type Request = T::Request;

    fn matches(&self, request: &Self::Request) -> bool {
        (**self).matches(request)
    }
}

/// Accepts any request.
pub struct AnyRequest<R: ?Sized> {
    _request: PhantomData<fn(&R)>,
}

impl<R: ?Sized> AnyRequest<R> {
    /// Creates an expectation that accepts any request.
    pub fn new() -> Self {
        Self {
            _request: PhantomData,
        }
    }

    /// Creates `count` catch-all expectations.
    pub fn times(count: usize) -> Vec<Self> {
        (0..count).map(|_| Self::new()).collect()
    }
}

impl<R: ?Sized> Default for AnyRequest<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ?Sized> fmt::Debug for AnyRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnyRequest")
    }
}

impl<R: fmt::Debug + ?Sized> RequestExpectation for AnyRequest<R> {
    type Request = R;

    fn matches(&self, _request: &R) -> bool {
        true
    }
}

/// Accepts requests equal to the wrapped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exact<T>(pub T);

impl<T> RequestExpectation for Exact<T>
where
    T: PartialEq + fmt::Debug + Send + Sync,
{
    type Request = T;

    fn matches(&self, request: &T) -> bool {
        self.0 == *request
    }
}
