//! Non-blocking circuit breaker

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::state::{Abandon, Admission, BreakerCore, Outcome, Permit, Ticket, log_transition};
use super::types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::clock::{TimeSource, system_clock};
use crate::error::CircuitOpenError;
use crate::recovery::ErrorKinds;

/// Circuit breaker for protecting async operations.
///
/// Uses an async mutex so waiting for the state never blocks a runtime
/// thread. The lock is released before the operation is awaited.
pub struct AsyncCircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    expected: ErrorKinds,
    clock: Arc<dyn TimeSource>,
    core: Mutex<BreakerCore>,
    /// Tickets dropped while `core` was busy, settled on the next call
    abandoned: parking_lot::Mutex<Vec<Ticket>>,
}

impl AsyncCircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            expected: ErrorKinds::any(),
            clock: system_clock(),
            core: Mutex::new(BreakerCore::new()),
            abandoned: parking_lot::Mutex::new(Vec::new()),
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

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn expected_errors(&self) -> &ErrorKinds {
        &self.expected
    }

    pub async fn state(&self) -> CircuitState {
        self.core.lock().await.state()
    }

    pub async fn failure_count(&self) -> u32 {
        self.core.lock().await.failure_count()
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        self.core.lock().await.stats()
    }

    /// Execute an async operation with circuit breaker protection.
    ///
    /// Dropping the returned future before it completes, for instance under
    /// `tokio::time::timeout`, counts as neither success nor failure and frees
    /// a half-open trial slot.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + From<CircuitOpenError> + 'static,
    {
        let (admission, transition) = {
            let mut core = self.core.lock().await;
            let now = self.clock.now();
            for ticket in self.abandoned.lock().drain(..) {
                core.record(ticket, Outcome::Ignored, now, &self.config);
            }
            core.admit(now, &self.config)
        };
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

        let result = operation().await;
        let ticket = permit.finish();

        let outcome = Outcome::of(&result, &self.expected);
        let transition = {
            let mut core = self.core.lock().await;
            core.record(ticket, outcome, self.clock.now(), &self.config)
        };
        if let Some(transition) = transition {
            log_transition(&self.name, transition);
        }
        result
    }

    pub async fn reset(&self) {
        let transition = self.core.lock().await.reset();
        log_transition(&self.name, transition);
    }

    pub async fn trip(&self) {
        let now = self.clock.now();
        let transition = self.core.lock().await.trip(now);
        log_transition(&self.name, transition);
    }
}

impl Abandon for AsyncCircuitBreaker {
    fn abandon(&self, ticket: Ticket) {
        tracing::debug!(circuit = %self.name, "Call abandoned before reporting an outcome");
        match self.core.try_lock() {
            Ok(mut core) => {
                core.record(ticket, Outcome::Ignored, self.clock.now(), &self.config);
            }
            Err(_) => self.abandoned.lock().push(ticket),
        }
    }
}

impl fmt::Debug for AsyncCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}
