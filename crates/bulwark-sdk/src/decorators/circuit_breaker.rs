//! `circuit_breaker()` decorator

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{
    AsyncCallable, AsyncCircuitBreaker, Callable, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry, CircuitOpenError, ConfigResult, Dimension, ErrorKinds, Metadata, Model,
    Target, TimeSource, system_clock,
};
use futures::future::BoxFuture;

use super::Decorator;

/// Start configuring a circuit breaker decorator.
///
/// Defaults: five failures open the circuit, thirty seconds until a trial.
pub fn circuit_breaker() -> CircuitBreakerDecorator {
    CircuitBreakerDecorator::default()
}

/// Builder for [`Guarded`] targets.
///
/// The breaker is registered as soon as this decorator is applied. A
/// decorator applied after it that fails validation does not undo the
/// registration, so the entry stays in the registry without a caller.
#[derive(Default)]
pub struct CircuitBreakerDecorator {
    config: CircuitBreakerConfig,
    expected: ErrorKinds,
    clock: Option<Arc<dyn TimeSource>>,
    registry: Option<Arc<CircuitBreakerRegistry>>,
    dimension: Option<Dimension>,
    name: Option<String>,
}

impl CircuitBreakerDecorator {
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.config.failure_threshold = failure_threshold;
        self
    }

    pub fn recovery_timeout(mut self, recovery_timeout: Duration) -> Self {
        self.config.recovery_timeout = recovery_timeout;
        self
    }

    /// Replace both threshold and timeout
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Count only errors of type `K` as failures (may be repeated)
    pub fn expected<K>(mut self) -> Self
    where
        K: StdError + 'static,
    {
        self.expected = self.expected.with::<K>();
        self
    }

    pub fn expected_matching<K, P>(mut self, predicate: P) -> Self
    where
        K: StdError + 'static,
        P: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.expected = self.expected.matching::<K, P>(predicate);
        self
    }

    pub fn time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register the breaker here instead of the global registry
    pub fn registry(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Pin the dimension instead of using the registry's default
    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Register under a fixed name instead of a generated `cb_<n>`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for CircuitBreakerDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerDecorator")
            .field("config", &self.config)
            .field("expected", &self.expected)
            .field("dimension", &self.dimension)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T: Target> Decorator<T> for CircuitBreakerDecorator {
    type Output = Guarded<T, <T::Model as Model>::Breaker>;

    fn decorate(self, target: T) -> ConfigResult<Self::Output> {
        self.config.validate()?;

        let registry = self.registry.unwrap_or_else(CircuitBreakerRegistry::global);
        let name = self.name.unwrap_or_else(|| registry.next_name());
        let dimension = self
            .dimension
            .unwrap_or_else(|| registry.default_dimension());
        let clock = self.clock.unwrap_or_else(system_clock);

        let breaker =
            <T::Model as Model>::build_breaker(name.clone(), self.config, self.expected, clock);
        registry.register(name, <T::Model as Model>::registry_handle(&breaker), dimension)?;

        Ok(Guarded {
            inner: target,
            breaker,
        })
    }
}

/// A target whose calls pass through a circuit breaker
pub struct Guarded<T, B> {
    inner: T,
    breaker: Arc<B>,
}

impl<T, B> Guarded<T, B> {
    /// The breaker guarding this target, as registered
    pub fn breaker(&self) -> &Arc<B> {
        &self.breaker
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Target, B> Target for Guarded<T, B> {
    type Model = T::Model;

    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<A, T> Callable<A> for Guarded<T, CircuitBreaker>
where
    T: Callable<A>,
    T::Error: StdError + From<CircuitOpenError> + 'static,
{
    type Output = T::Output;
    type Error = T::Error;

    fn call(&self, args: A) -> Result<T::Output, T::Error> {
        self.breaker.call(|| self.inner.call(args))
    }
}

impl<A, T> AsyncCallable<A> for Guarded<T, AsyncCircuitBreaker>
where
    T: AsyncCallable<A>,
    T::Output: Send,
    T::Error: StdError + From<CircuitOpenError> + Send + 'static,
    A: Send + 'static,
{
    type Output = T::Output;
    type Error = T::Error;

    fn call(&self, args: A) -> BoxFuture<'_, Result<T::Output, T::Error>> {
        Box::pin(self.breaker.call(move || self.inner.call(args)))
    }
}

impl<T: Target, B: fmt::Debug> fmt::Debug for Guarded<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded")
            .field("metadata", self.inner.metadata())
            .field("breaker", &self.breaker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use bulwark_core::{CircuitState, ConfigurationError, ManualClock, RegisteredBreaker};
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    enum DbError {
        #[error("connection refused")]
        Refused,
        #[error("row missing")]
        Missing,
        #[error(transparent)]
        Open(#[from] CircuitOpenError),
    }

    fn isolated() -> Arc<CircuitBreakerRegistry> {
        Arc::new(CircuitBreakerRegistry::new())
    }

    #[test]
    fn test_blocking_target_gets_blocking_breaker() {
        let registry = isolated();
        let query = blocking("query", |_: ()| Err::<u32, _>(DbError::Refused))
            .decorate_with(circuit_breaker().failure_threshold(1).registry(registry.clone()))
            .unwrap();

        assert_eq!(query.breaker().name(), "cb_1");
        assert_eq!(query.execution_model(), ExecutionModel::Blocking);
        assert!(matches!(
            registry.get("cb_1", Dimension::Production),
            Some(RegisteredBreaker::Blocking(_))
        ));

        assert_eq!(query.call(()), Err(DbError::Refused));
        assert_eq!(query.breaker().state(), CircuitState::Open);
        assert_eq!(
            query.call(()),
            Err(DbError::Open(CircuitOpenError::new("cb_1")))
        );
    }

    #[tokio::test]
    async fn test_non_blocking_target_gets_async_breaker() {
        let registry = isolated();
        let query = non_blocking("query", |id: u32| async move { Ok::<_, DbError>(id) })
            .decorate_with(
                circuit_breaker()
                    .name("orders_db")
                    .registry(registry.clone()),
            )
            .unwrap();

        assert_eq!(query.call(5).await, Ok(5));
        assert_eq!(query.breaker().state().await, CircuitState::Closed);
        assert!(matches!(
            registry.get("orders_db", Dimension::Production),
            Some(RegisteredBreaker::NonBlocking(_))
        ));
    }

    #[test]
    fn test_unexpected_errors_bypass_breaker() {
        let registry = isolated();
        let query = blocking("query", |_: ()| Err::<u32, _>(DbError::Missing))
            .decorate_with(
                circuit_breaker()
                    .failure_threshold(1)
                    .expected_matching::<DbError, _>(|e| matches!(e, DbError::Refused))
                    .registry(registry),
            )
            .unwrap();

        for _ in 0..3 {
            assert_eq!(query.call(()), Err(DbError::Missing));
        }
        assert_eq!(query.breaker().state(), CircuitState::Closed);
    }

    #[test]
    fn test_dimension_resolution() {
        let registry = isolated();
        registry.set_test_mode(true);

        let from_registry = blocking("a", |_: ()| Ok::<u32, DbError>(1))
            .decorate_with(circuit_breaker().registry(registry.clone()))
            .unwrap();
        let pinned = blocking("b", |_: ()| Ok::<u32, DbError>(1))
            .decorate_with(
                circuit_breaker()
                    .registry(registry.clone())
                    .dimension(Dimension::Production),
            )
            .unwrap();

        assert_eq!(registry.list(Dimension::Test), vec![from_registry.breaker().name()]);
        assert_eq!(registry.list(Dimension::Production), vec![pinned.breaker().name()]);
    }

    #[test]
    fn test_invalid_threshold_fails_decoration() {
        let registry = isolated();
        let result = blocking("query", |_: ()| Ok::<u32, DbError>(1))
            .decorate_with(circuit_breaker().failure_threshold(0).registry(registry.clone()));

        assert!(matches!(result, Err(ConfigurationError::InvalidFailureThreshold)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_outlives_later_failed_decoration() {
        let registry = isolated();
        let policy = RetryPolicy::builder().max_attempts(3).build().unwrap();
        let result = blocking("query", |_: ()| Ok::<u32, DbError>(1))
            .decorate_with(circuit_breaker().registry(registry.clone()))
            .and_then(|guarded| guarded.decorate_with(retry().policy(policy).max_attempts(2)));

        assert!(matches!(
            result,
            Err(ConfigurationError::ConflictingRetryOptions(_))
        ));
        assert_eq!(registry.list(Dimension::Production), vec!["cb_1"]);
    }

    #[test]
    fn test_duplicate_name_fails_decoration() {
        let registry = isolated();
        let decorate = || {
            blocking("query", |_: ()| Ok::<u32, DbError>(1))
                .decorate_with(circuit_breaker().name("shared").registry(registry.clone()))
        };

        assert!(decorate().is_ok());
        assert_eq!(
            decorate().unwrap_err(),
            ConfigurationError::DuplicateBreaker("shared".to_string())
        );
    }

    #[test]
    fn test_recovery_uses_injected_clock() {
        let clock = Arc::new(ManualClock::new());
        let query = blocking("query", |fail: bool| {
            if fail { Err(DbError::Refused) } else { Ok(1u32) }
        })
        .decorate_with(
            circuit_breaker()
                .failure_threshold(1)
                .recovery_timeout(Duration::from_secs(60))
                .time_source(clock.clone())
                .registry(isolated()),
        )
        .unwrap();

        let _ = query.call(true);
        clock.advance(Duration::from_secs(60));
        assert!(matches!(query.call(false), Err(DbError::Open(_))));
        assert_eq!(query.call(false), Ok(1));
        assert_eq!(query.breaker().state(), CircuitState::Closed);
    }
}
