//! Circuit breaker pattern for fault tolerance
//!
//! Prevents cascading failures by temporarily rejecting calls to a failing
//! dependency. Both variants share one state machine and differ only in the
//! lock they guard it with.

mod async_breaker;
mod breaker;
mod registry;
mod state;
mod types;


pub use async_breaker::AsyncCircuitBreaker;
pub use breaker::CircuitBreaker;
pub use registry::{CircuitBreakerRegistry, Dimension, RegisteredBreaker};
pub use types::{
    CircuitBreakerConfig, CircuitBreakerStats, CircuitState, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RECOVERY_TIMEOUT,
};
