//! Error recovery engine
//!
//! This module provides the recovery primitives decorators are built from:
//! - Backoff computation
//! - Retry policies and the retry executor
//! - Circuit breakers (blocking and non-blocking) and their registry
//! - Fallback chains

pub mod backoff;
pub mod circuit_breaker;
pub mod fallback;
pub mod retry;

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

pub use backoff::Backoff;
pub use circuit_breaker::{
    AsyncCircuitBreaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState, Dimension, RegisteredBreaker,
};
pub use fallback::{Alternate, AsyncFallbackChain, BuildChain, FallbackChain};
pub use retry::{OnRetry, RetryConfig, RetryExecutor, RetryPolicy, RetryPolicyBuilder};

type Matcher = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// A set of error kinds.
///
/// Used as the retryable set of a [`RetryPolicy`] and the expected set of a
/// circuit breaker. A kind is either a concrete error type or a predicate over
/// one (typically a single enum variant). The empty set matches every error.
#[derive(Clone, Default)]
pub struct ErrorKinds {
    matchers: Vec<Matcher>,
}

impl ErrorKinds {
    /// The empty set, matching any error
    pub fn any() -> Self {
        Self::default()
    }

    /// Set containing every error of type `K`
    pub fn of<K>() -> Self
    where
        K: StdError + 'static,
    {
        Self::any().with::<K>()
    }

    /// Add every error of type `K`
    pub fn with<K>(mut self) -> Self
    where
        K: StdError + 'static,
    {
        self.matchers
            .push(Arc::new(|error: &(dyn StdError + 'static)| error.is::<K>()));
        self
    }

    /// Add errors of type `K` accepted by `predicate`
    pub fn matching<K, P>(mut self, predicate: P) -> Self
    where
        K: StdError + 'static,
        P: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.matchers.push(Arc::new(move |error: &(dyn StdError + 'static)| {
            error.downcast_ref::<K>().is_some_and(&predicate)
        }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether `error` belongs to the set (always true for the empty set)
    pub fn matches(&self, error: &(dyn StdError + 'static)) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|matcher| matcher(error))
    }
}

impl fmt::Debug for ErrorKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matchers.is_empty() {
            write!(f, "ErrorKinds(any)")
        } else {
            write!(f, "ErrorKinds({} kinds)", self.matchers.len())
        }
    }
}
