//! Blocking circuit breaker

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::state::{Abandon, Admission, BreakerCore, Outcome, Permit, Ticket, log_transition};
use super::types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::clock::{TimeSource, system_clock};
use crate::error::CircuitOpenError;
use crate::recovery::ErrorKinds;

/// Circuit breaker for protecting blocking operations.
///
/// The state lock is held only while admitting a call and while recording its
/// outcome; the operation itself runs unlocked.
pub struct CircuitBreaker {
    /// Component name (for logging and the registry)
    name: String,
    config: CircuitBreakerConfig,
    /// Errors that count toward opening the circuit
    expected: ErrorKinds,
    clock: Arc<dyn TimeSource>,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default config
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom config
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            expected: ErrorKinds::any(),
            clock: system_clock(),
            core: Mutex::new(BreakerCore::new()),
        }
    }

    /// Restrict which errors count as failures
    pub fn with_expected(mut self, expected: ErrorKinds) -> Self {
        self.expected = expected;
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn expected_errors(&self) -> &ErrorKinds {
        &self.expected
    }

    /// Current state, without applying any pending recovery transition
    pub fn state(&self) -> CircuitState {
        self.core.lock().state()
    }

    pub fn failure_count(&self) -> u32 {
        self.core.lock().failure_count()
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.core.lock().stats()
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Rejected calls return `E::from(CircuitOpenError)` without running
    /// `operation`. The operation's own result is returned unchanged. If the
    /// operation panics the call counts as neither success nor failure.
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: StdError + From<CircuitOpenError> + 'static,
    {
        let (admission, transition) = self.core.lock().admit(self.clock.now(), &self.config);
        if let Some(transition) = transition {
            log_transition(&self.name, transition);
        }
        let permit = match admission {
            Admission::Admitted(ticket) => Permit::new(ticket, self),
            Admission::Rejected => {
                tracing::debug!(circuit = %self.name, "Call rejected by open circuit");
                return Err(CircuitOpenError::new(self.name.as_str()).into());
            }
        };

        let result = operation();
        let ticket = permit.finish();

        let outcome = Outcome::of(&result, &self.expected);
        let now = self.clock.now();
        let transition = self.core.lock().record(ticket, outcome, now, &self.config);
        if let Some(transition) = transition {
            log_transition(&self.name, transition);
        }
        result
    }

    /// Manually reset the circuit breaker to closed state
    pub fn reset(&self) {
        let transition = self.core.lock().reset();
        log_transition(&self.name, transition);
    }

    /// Manually open the circuit breaker
    pub fn trip(&self) {
        let transition = self.core.lock().trip(self.clock.now());
        log_transition(&self.name, transition);
    }
}

impl Abandon for CircuitBreaker {
    fn abandon(&self, ticket: Ticket) {
        tracing::debug!(circuit = %self.name, "Call abandoned before reporting an outcome");
        let now = self.clock.now();
        self.core
            .lock()
            .record(ticket, Outcome::Ignored, now, &self.config);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("expected", &self.expected)
            .field("state", &self.state())
            .finish()
    }
}
