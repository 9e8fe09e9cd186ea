//! Bulwark SDK
//!
//! Decorators that wrap blocking or non-blocking callables with retry,
//! circuit breaker and fallback behavior while keeping their call signature.
//!
//! # Example
//!
//! ```rust
//! use bulwark_sdk::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug, thiserror::Error)]
//! enum LookupError {
//!     #[error("backend timed out")]
//!     Timeout,
//!     #[error(transparent)]
//!     Open(#[from] CircuitOpenError),
//! }
//!
//! let registry = Arc::new(CircuitBreakerRegistry::new());
//! let lookup = blocking("lookup", |key: &'static str| {
//!     if key.is_empty() { Err(LookupError::Timeout) } else { Ok(key.len()) }
//! })
//! .decorate_with(circuit_breaker().failure_threshold(3).registry(registry))
//! .and_then(|guarded| {
//!     guarded.decorate_with(retry().on::<LookupError>().base_delay(Duration::ZERO))
//! })
//! .unwrap();
//!
//! assert_eq!(lookup.call("abc").unwrap(), 3);
//! ```

#![allow(clippy::type_complexity)]

pub mod decorators;
pub mod maintenance;

pub use decorators::{
    CircuitBreakerDecorator, Decorate, Decorator, FallbackDecorator, Guarded, RetryDecorator,
    Retrying, WithFallback, circuit_breaker, fallback, retry,
};
pub use maintenance::{reset_circuit_breakers_for_testing, reset_test_circuit_breakers};

// Re-export the engine
pub use bulwark_core;

/// Everything needed to declare and call decorated functions
pub mod prelude {
    pub use crate::decorators::{Decorate, Decorator, circuit_breaker, fallback, retry};
    pub use bulwark_core::{
        Alternate, AsyncCallable, Backoff, Callable, CircuitBreakerRegistry, CircuitOpenError,
        ConfigurationError, Dimension, ErrorKinds, ExecutionModel, RetryPolicy, Target, blocking,
        non_blocking,
    };
}
