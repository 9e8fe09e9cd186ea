//! Bulwark Core Library
//!
//! This crate provides the resilience engine behind bulwark: retry policies
//! and their executor, blocking and non-blocking circuit breakers with a
//! shared registry, fallback chains, and file-based configuration.

#![allow(clippy::type_complexity)]

pub mod call;
pub mod clock;
pub mod config;
pub mod error;
pub mod recovery;

// Re-export commonly used types
pub use call::{
    AsyncCallable, AsyncFn, Blocking, BlockingFn, Callable, ExecutionModel, Metadata, Model,
    NonBlocking, Target, blocking, non_blocking,
};
pub use clock::{
    AsyncSleeper, ManualClock, RecordingSleeper, Sleeper, SystemClock, ThreadSleeper, TimeSource,
    TokioSleeper, system_clock,
};
pub use config::ResilienceConfig;
pub use error::{CircuitOpenError, ConfigResult, ConfigurationError};
pub use recovery::{
    Alternate, AsyncCircuitBreaker, AsyncFallbackChain, Backoff, BuildChain, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState, Dimension,
    ErrorKinds, FallbackChain, OnRetry, RegisteredBreaker, RetryConfig, RetryExecutor,
    RetryPolicy, RetryPolicyBuilder,
};
