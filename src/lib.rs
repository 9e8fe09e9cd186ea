//! Bulwark
//!
//! Retry, circuit breaker and fallback decorators for blocking and async
//! callables. This crate bundles [`bulwark_sdk`] and [`bulwark_core`] behind
//! a single dependency.
//!
//! ```rust
//! use bulwark::prelude::*;
//! use std::time::Duration;
//!
//! let parse = blocking("parse", |raw: &'static str| raw.parse::<u32>())
//!     .decorate_with(retry().max_attempts(2).base_delay(Duration::ZERO))
//!     .unwrap();
//!
//! assert_eq!(parse.call("17"), Ok(17));
//! ```

pub use bulwark_core;
pub use bulwark_sdk::*;

pub mod prelude {
    pub use bulwark_sdk::prelude::*;
    pub use bulwark_sdk::{reset_circuit_breakers_for_testing, reset_test_circuit_breakers};
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// The library only emits events; applications that want to see breaker
/// transitions and retry attempts call this once at startup. Set
/// `RUST_LOG=bulwark_core=debug` for per-attempt detail.
pub fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
