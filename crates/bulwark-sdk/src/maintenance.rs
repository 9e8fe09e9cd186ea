//! Registry maintenance entry points for test harnesses and operators
//!
//! Both functions act on [`CircuitBreakerRegistry::global`]. Code that
//! injects its own registry calls [`CircuitBreakerRegistry::reset_all`] on it.

use bulwark_core::{CircuitBreakerRegistry, Dimension};

/// Reset every production-dimension breaker in the global registry to closed
pub async fn reset_circuit_breakers_for_testing() {
    CircuitBreakerRegistry::global()
        .reset_all(Dimension::Production)
        .await;
}

/// Reset every test-dimension breaker in the global registry to closed.
///
/// Production breakers are left untouched.
pub async fn reset_test_circuit_breakers() {
    CircuitBreakerRegistry::global()
        .reset_all(Dimension::Test)
        .await;
}
