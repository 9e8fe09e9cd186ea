//! Decorators
//!
//! A decorator is a configured builder that wraps a [`Target`] into a new
//! target with the same call signature. Decoration validates the
//! configuration and fixes the execution model once; calls never re-check it.
//!
//! ```
//! use bulwark_sdk::prelude::*;
//! use std::time::Duration;
//!
//! let fetch = blocking("fetch", |id: u32| Ok::<_, std::io::Error>(id * 10))
//!     .decorate_with(retry().max_attempts(3).base_delay(Duration::ZERO))
//!     .unwrap();
//! assert_eq!(fetch.call(4).unwrap(), 40);
//! assert_eq!(fetch.metadata().name(), "fetch");
//! ```

mod circuit_breaker;
mod fallback;
mod retry;

pub use circuit_breaker::{CircuitBreakerDecorator, Guarded, circuit_breaker};
pub use fallback::{FallbackDecorator, WithFallback, fallback};
pub use retry::{RetryDecorator, Retrying, retry};

use bulwark_core::{ConfigResult, Target};

/// Wraps a target into a decorated target
pub trait Decorator<T> {
    type Output;

    /// Validate the configuration and wrap `target`.
    ///
    /// Fails with a [`bulwark_core::ConfigurationError`]; never at call time.
    fn decorate(self, target: T) -> ConfigResult<Self::Output>;
}

/// Method-call syntax for applying decorators, innermost first
pub trait Decorate: Target + Sized {
    fn decorate_with<D>(self, decorator: D) -> ConfigResult<D::Output>
    where
        D: Decorator<Self>,
    {
        decorator.decorate(self)
    }
}

impl<T: Target> Decorate for T {}
