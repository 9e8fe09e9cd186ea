//! `retry()` decorator

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{
    AsyncCallable, AsyncSleeper, Backoff, Callable, ConfigResult, ConfigurationError, ErrorKinds,
    Metadata, OnRetry, RetryExecutor, RetryPolicy, Sleeper, Target, TimeSource,
};
use futures::future::BoxFuture;

use super::Decorator;

/// Start configuring a retry decorator.
///
/// With no options the default policy applies and every error is retried.
pub fn retry() -> RetryDecorator {
    RetryDecorator::default()
}

/// Builder for [`Retrying`] targets
#[derive(Default)]
pub struct RetryDecorator {
    exceptions: ErrorKinds,
    policy: Option<RetryPolicy>,
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    backoff: Option<Backoff>,
    max_delay: Option<Duration>,
    jitter: Option<bool>,
    on_retry: Option<OnRetry>,
    clock: Option<Arc<dyn TimeSource>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    async_sleeper: Option<Arc<dyn AsyncSleeper>>,
    seed: Option<u64>,
}

impl RetryDecorator {
    /// Retry only errors of type `K` (may be repeated)
    pub fn on<K>(mut self) -> Self
    where
        K: StdError + 'static,
    {
        self.exceptions = self.exceptions.with::<K>();
        self
    }

    /// Retry errors of type `K` accepted by `predicate`
    pub fn on_matching<K, P>(mut self, predicate: P) -> Self
    where
        K: StdError + 'static,
        P: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.exceptions = self.exceptions.matching::<K, P>(predicate);
        self
    }

    /// Use a prebuilt policy; cannot be combined with the tuning options
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = Some(base_delay);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Called with the attempt number and error before each retry
    pub fn on_retry<F>(mut self, on_retry: F) -> Self
    where
        F: Fn(u32, &(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }

    pub fn time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn async_sleeper(mut self, sleeper: Arc<dyn AsyncSleeper>) -> Self {
        self.async_sleeper = Some(sleeper);
        self
    }

    /// Seed the jitter generator
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn tuning_options(&self) -> Vec<&'static str> {
        [
            ("max_attempts", self.max_attempts.is_some()),
            ("base_delay", self.base_delay.is_some()),
            ("backoff", self.backoff.is_some()),
            ("max_delay", self.max_delay.is_some()),
            ("jitter", self.jitter.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    fn resolve_policy(&mut self) -> ConfigResult<RetryPolicy> {
        let exceptions = std::mem::take(&mut self.exceptions);
        if let Some(policy) = self.policy.take() {
            let conflicting = self.tuning_options();
            if !conflicting.is_empty() {
                return Err(ConfigurationError::ConflictingRetryOptions(conflicting));
            }
            return Ok(if exceptions.is_empty() {
                policy
            } else {
                policy.with_retryable(exceptions)
            });
        }

        let mut builder = RetryPolicy::builder().retryable(exceptions);
        if let Some(max_attempts) = self.max_attempts {
            builder = builder.max_attempts(max_attempts);
        }
        if let Some(base_delay) = self.base_delay {
            builder = builder.base_delay(base_delay);
        }
        if let Some(backoff) = self.backoff {
            builder = builder.backoff(backoff);
        }
        if let Some(max_delay) = self.max_delay {
            builder = builder.max_delay(max_delay);
        }
        if let Some(jitter) = self.jitter {
            builder = builder.jitter(jitter);
        }
        builder.build()
    }

    /// Validate the options and build the executor a [`Retrying`] target uses
    pub fn into_executor(mut self) -> ConfigResult<RetryExecutor> {
        let mut executor = RetryExecutor::new(self.resolve_policy()?);
        if let Some(on_retry) = self.on_retry {
            executor = executor
                .with_on_retry(move |attempt: u32, error: &(dyn StdError + 'static)| {
                    on_retry(attempt, error)
                });
        }
        if let Some(clock) = self.clock {
            executor = executor.with_time_source(clock);
        }
        if let Some(sleeper) = self.sleeper {
            executor = executor.with_sleeper(sleeper);
        }
        if let Some(sleeper) = self.async_sleeper {
            executor = executor.with_async_sleeper(sleeper);
        }
        if let Some(seed) = self.seed {
            executor = executor.with_seed(seed);
        }
        Ok(executor)
    }
}

impl fmt::Debug for RetryDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDecorator")
            .field("exceptions", &self.exceptions)
            .field("policy", &self.policy)
            .field("tuning", &self.tuning_options())
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl<T: Target> Decorator<T> for RetryDecorator {
    type Output = Retrying<T>;

    fn decorate(self, target: T) -> ConfigResult<Retrying<T>> {
        let executor = self.into_executor()?;
        tracing::debug!(
            target_name = target.metadata().name(),
            model = %target.execution_model(),
            max_attempts = executor.policy().max_attempts(),
            "Decorated with retry"
        );
        Ok(Retrying {
            inner: target,
            executor,
        })
    }
}

/// A target whose calls are retried under a policy
pub struct Retrying<T> {
    inner: T,
    executor: RetryExecutor,
}

impl<T> Retrying<T> {
    pub fn policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Target> Target for Retrying<T> {
    type Model = T::Model;

    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<A, T> Callable<A> for Retrying<T>
where
    T: Callable<A>,
    T::Error: StdError + 'static,
    A: Clone,
{
    type Output = T::Output;
    type Error = T::Error;

    fn call(&self, args: A) -> Result<T::Output, T::Error> {
        self.executor.execute(&self.inner, args)
    }
}

impl<A, T> AsyncCallable<A> for Retrying<T>
where
    T: AsyncCallable<A>,
    T::Output: Send,
    T::Error: StdError + Send + 'static,
    A: Clone + Send + 'static,
{
    type Output = T::Output;
    type Error = T::Error;

    fn call(&self, args: A) -> BoxFuture<'_, Result<T::Output, T::Error>> {
        Box::pin(self.executor.execute_async(&self.inner, args))
    }
}

impl<T: Target> fmt::Debug for Retrying<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("metadata", self.inner.metadata())
            .field("policy", self.executor.policy())
            .finish()
    }
}
