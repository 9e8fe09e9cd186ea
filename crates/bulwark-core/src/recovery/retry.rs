//! Retry policies and the retry executor
//!
//! A [`RetryPolicy`] is an immutable description of how often and how patiently
//! to retry. A [`RetryExecutor`] applies a policy to a blocking or non-blocking
//! callable, sleeping through injectable hooks between attempts.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::ErrorKinds;
use super::backoff::{Backoff, full_jitter};
use crate::call::{AsyncCallable, Callable};
use crate::clock::{AsyncSleeper, Sleeper, ThreadSleeper, TimeSource, TokioSleeper, system_clock};
use crate::error::{ConfigResult, ConfigurationError};

/// Default number of attempts, including the first call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default cap on a single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Callback invoked with the 1-indexed attempt number and its error before a retry
pub type OnRetry = Arc<dyn Fn(u32, &(dyn StdError + 'static)) + Send + Sync>;

/// Serializable retry settings
///
/// # Example
/// ```
/// use bulwark_core::recovery::{Backoff, RetryConfig};
/// use std::time::Duration;
///
/// let config: RetryConfig = toml::from_str(
///     r#"
///     max_attempts = 5
///     base_delay = "200ms"
///     backoff = "linear"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.base_delay, Duration::from_millis(200));
/// assert_eq!(config.backoff, Backoff::Linear);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first call
    pub max_attempts: u32,
    /// Delay unit fed to the backoff
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Delay shape
    pub backoff: Backoff,
    /// Upper bound on a single computed delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Randomize each delay within `[0, delay]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff: Backoff::Exponential,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Check the invariants a policy relies on
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidMaxAttempts(self.max_attempts));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigurationError::MaxDelayBelowBaseDelay {
                base_delay: self.base_delay,
                max_delay: self.max_delay,
            });
        }
        Ok(())
    }
}

/// Immutable retry policy.
///
/// Callers that need different behavior build a new policy.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    retryable: ErrorKinds,
}

impl RetryPolicy {
    /// Default policy: retry any error with default timing
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
            retryable: ErrorKinds::any(),
        }
    }

    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Build a policy retrying any error from validated settings
    pub fn from_config(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            retryable: ErrorKinds::any(),
        })
    }

    /// Single attempt, never retries
    pub fn no_retry() -> Self {
        Self {
            config: RetryConfig {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                backoff: Backoff::None,
                max_delay: Duration::ZERO,
                jitter: false,
            },
            retryable: ErrorKinds::any(),
        }
    }

    /// A new policy with the same timing and a different retryable set
    pub fn with_retryable(&self, retryable: ErrorKinds) -> Self {
        Self {
            config: self.config.clone(),
            retryable,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.config.base_delay
    }

    pub fn backoff(&self) -> Backoff {
        self.config.backoff
    }

    pub fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    pub fn jitter(&self) -> bool {
        self.config.jitter
    }

    pub fn retryable_errors(&self) -> &ErrorKinds {
        &self.retryable
    }

    /// Whether an error may be retried at all
    pub fn is_retryable(&self, error: &(dyn StdError + 'static)) -> bool {
        self.retryable.matches(error)
    }

    /// Capped delay after the given 1-indexed attempt, before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.config
            .backoff
            .delay(self.config.base_delay, self.config.max_delay, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("retryable", &self.retryable)
            .finish()
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Default, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    backoff: Option<Backoff>,
    max_delay: Option<Duration>,
    jitter: Option<bool>,
    retryable: ErrorKinds,
}

impl RetryPolicyBuilder {
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

    /// Retry errors of type `K`
    pub fn retry_on<K>(mut self) -> Self
    where
        K: StdError + 'static,
    {
        self.retryable = self.retryable.with::<K>();
        self
    }

    /// Retry errors of type `K` accepted by `predicate`
    pub fn retry_on_matching<K, P>(mut self, predicate: P) -> Self
    where
        K: StdError + 'static,
        P: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.retryable = self.retryable.matching::<K, P>(predicate);
        self
    }

    /// Replace the retryable set
    pub fn retryable(mut self, retryable: ErrorKinds) -> Self {
        self.retryable = retryable;
        self
    }

    /// Validate and freeze the policy.
    ///
    /// Without an explicit `max_delay` the cap is the default cap, raised to
    /// `base_delay` when needed.
    pub fn build(self) -> ConfigResult<RetryPolicy> {
        let defaults = RetryConfig::default();
        let base_delay = self.base_delay.unwrap_or(defaults.base_delay);
        let max_delay = self
            .max_delay
            .unwrap_or_else(|| defaults.max_delay.max(base_delay));

        let config = RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay,
            backoff: self.backoff.unwrap_or(defaults.backoff),
            max_delay,
            jitter: self.jitter.unwrap_or(defaults.jitter),
        };
        config.validate()?;

        Ok(RetryPolicy {
            config,
            retryable: self.retryable,
        })
    }
}

/// Runs callables under a [`RetryPolicy`]
pub struct RetryExecutor {
    policy: RetryPolicy,
    on_retry: Option<OnRetry>,
    clock: Arc<dyn TimeSource>,
    sleeper: Arc<dyn Sleeper>,
    async_sleeper: Arc<dyn AsyncSleeper>,
    rng: Mutex<StdRng>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_retry: None,
            clock: system_clock(),
            sleeper: Arc::new(ThreadSleeper),
            async_sleeper: Arc::new(TokioSleeper),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Observe each failed attempt that is about to be retried
    pub fn with_on_retry<F>(mut self, on_retry: F) -> Self
    where
        F: Fn(u32, &(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(on_retry));
        self
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_async_sleeper(mut self, sleeper: Arc<dyn AsyncSleeper>) -> Self {
        self.async_sleeper = sleeper;
        self
    }

    /// Make jitter reproducible
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay to wait after the given attempt, jitter included
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.policy.delay_for_attempt(attempt);
        if self.policy.jitter() {
            full_jitter(delay, &mut *self.rng.lock())
        } else {
            delay
        }
    }

    /// Invoke a blocking callable until it succeeds, fails permanently, or
    /// runs out of attempts. The last error is returned unchanged.
    pub fn execute<C, A>(&self, target: &C, args: A) -> Result<C::Output, C::Error>
    where
        C: Callable<A> + ?Sized,
        A: Clone,
        C::Error: StdError + 'static,
    {
        let started = self.clock.now();
        let mut attempt = 1;
        loop {
            let delay = match target.call(args.clone()) {
                Ok(value) => return Ok(value),
                Err(error) => match self.plan_retry(attempt, &error, started) {
                    Some(delay) => delay,
                    None => return Err(error),
                },
            };
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }

    /// Non-blocking counterpart of [`RetryExecutor::execute`]; sleeps yield to
    /// the scheduler.
    pub async fn execute_async<C, A>(&self, target: &C, args: A) -> Result<C::Output, C::Error>
    where
        C: AsyncCallable<A> + ?Sized,
        A: Clone,
        C::Error: StdError + 'static,
    {
        let started = self.clock.now();
        let mut attempt = 1;
        loop {
            let delay = match target.call(args.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => match self.plan_retry(attempt, &error, started) {
                    Some(delay) => delay,
                    None => return Err(error),
                },
            };
            self.async_sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Decide what follows a failed attempt: `Some(delay)` to retry, `None`
    /// to give up and surface the error.
    fn plan_retry(
        &self,
        attempt: u32,
        error: &(dyn StdError + 'static),
        started: Instant,
    ) -> Option<Duration> {
        let max_attempts = self.policy.max_attempts();
        let elapsed = self.clock.now().saturating_duration_since(started);

        if !self.policy.is_retryable(error) {
            tracing::debug!(attempt, %error, "Error is not retryable, giving up");
            return None;
        }

        if attempt >= max_attempts {
            tracing::debug!(
                attempt,
                max_attempts,
                ?elapsed,
                %error,
                "Retry attempts exhausted"
            );
            return None;
        }

        if let Some(on_retry) = &self.on_retry {
            on_retry(attempt, error);
        }

        let delay = self.next_delay(attempt);
        tracing::debug!(
            attempt,
            max_attempts,
            ?delay,
            ?elapsed,
            %error,
            "Operation failed, retrying"
        );
        Some(delay)
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{blocking, non_blocking};
    use crate::clock::{ManualClock, RecordingSleeper};
    use std::sync::atomic::{AtomicU32, Ordering};
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    enum TestError {
        #[error("timeout #{0}")]
        Timeout(u32),
        #[error("invalid request")]
        Invalid,
    }

    fn quiet_executor(policy: RetryPolicy) -> (RetryExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(policy)
            .with_sleeper(sleeper.clone())
            .with_async_sleeper(sleeper.clone());
        (executor, sleeper)
    }

    #[test]
    fn test_builder_defaults() {
        let policy = RetryPolicy::builder().build().unwrap();
        assert_eq!(policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.base_delay(), DEFAULT_BASE_DELAY);
        assert_eq!(policy.backoff(), Backoff::Exponential);
        assert_eq!(policy.max_delay(), DEFAULT_MAX_DELAY);
        assert!(policy.retryable_errors().is_empty());
    }

    #[test]
    fn test_builder_rejects_zero_attempts() {
        let err = RetryPolicy::builder().max_attempts(0).build().unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidMaxAttempts(0));
    }

    #[test]
    fn test_builder_rejects_cap_below_base() {
        let err = RetryPolicy::builder()
            .base_delay(Duration::from_secs(2))
            .max_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MaxDelayBelowBaseDelay { .. }));
    }

    #[test]
    fn test_builder_raises_default_cap_to_base() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_secs(120))
            .build()
            .unwrap();
        assert_eq!(policy.max_delay(), Duration::from_secs(120));
    }

    #[test]
    fn test_with_retryable_builds_new_policy() {
        let original = RetryPolicy::builder().max_attempts(4).build().unwrap();
        let narrowed = original.with_retryable(ErrorKinds::of::<TestError>());

        assert!(original.retryable_errors().is_empty());
        assert_eq!(narrowed.retryable_errors().len(), 1);
        assert_eq!(narrowed.max_attempts(), 4);
    }

    #[test]
    fn test_retry_always_failing_invokes_max_attempts() {
        let policy = RetryPolicy::builder()
            .max_attempts(4)
            .backoff(Backoff::None)
            .jitter(false)
            .build()
            .unwrap();
        let (executor, _) = quiet_executor(policy);
        let calls = AtomicU32::new(0);
        let target = blocking("flaky", |_: ()| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(TestError::Timeout(n))
        });

        let err = executor.execute(&target, ()).unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err, TestError::Timeout(4));
    }

    #[test]
    fn test_retry_success_after_failures() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(Duration::ZERO)
            .backoff(Backoff::None)
            .build()
            .unwrap();
        let (executor, sleeper) = quiet_executor(policy);
        let calls = AtomicU32::new(0);
        let target = blocking("flaky", |x: u32| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(TestError::Timeout(n))
            } else {
                Ok(x * 2)
            }
        });

        assert_eq!(executor.execute(&target, 21), Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.delays(), vec![Duration::ZERO, Duration::ZERO]);
    }

    #[test]
    fn test_non_retryable_error_fails_immediately() {
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .retry_on_matching::<TestError, _>(|e| matches!(e, TestError::Timeout(_)))
            .build()
            .unwrap();
        let (executor, sleeper) = quiet_executor(policy);
        let calls = AtomicU32::new(0);
        let target = blocking("invalid", |_: ()| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Invalid)
        });

        assert_eq!(executor.execute(&target, ()), Err(TestError::Invalid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_exponential_delays_are_slept() {
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .backoff(Backoff::Exponential)
            .jitter(false)
            .build()
            .unwrap();
        let (executor, sleeper) = quiet_executor(policy);
        let target = blocking("down", |_: ()| Err::<(), _>(TestError::Timeout(0)));

        let _ = executor.execute(&target, ());
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_jittered_delays_within_bounds_and_seeded() {
        let policy = RetryPolicy::builder()
            .max_attempts(6)
            .base_delay(Duration::from_millis(100))
            .jitter(true)
            .build()
            .unwrap();

        let run = |seed: u64| {
            let (executor, sleeper) = quiet_executor(policy.clone());
            let executor = executor.with_seed(seed);
            let target = blocking("down", |_: ()| Err::<(), _>(TestError::Timeout(0)));
            let _ = executor.execute(&target, ());
            sleeper.delays()
        };

        let first = run(42);
        assert_eq!(first, run(42));
        for (index, delay) in first.iter().enumerate() {
            assert!(*delay <= policy.delay_for_attempt(index as u32 + 1));
        }
    }

    #[test]
    fn test_on_retry_sees_each_retried_attempt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .backoff(Backoff::None)
            .build()
            .unwrap();
        let (executor, _) = quiet_executor(policy);
        let executor = executor.with_on_retry(move |attempt, error| {
            recorder.lock().push((attempt, error.to_string()));
        });
        let target = blocking("down", |_: ()| Err::<(), _>(TestError::Timeout(9)));

        let _ = executor.execute(&target, ());
        assert_eq!(
            *seen.lock(),
            vec![(1, "timeout #9".to_string()), (2, "timeout #9".to_string())]
        );
    }

    #[test]
    fn test_time_source_drives_elapsed() {
        let clock = Arc::new(ManualClock::new());
        let sleeper = Arc::new(RecordingSleeper::advancing(Arc::clone(&clock)));
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(Duration::from_secs(1))
            .backoff(Backoff::Linear)
            .jitter(false)
            .build()
            .unwrap();
        let executor = RetryExecutor::new(policy)
            .with_time_source(clock.clone())
            .with_sleeper(sleeper);
        let target = blocking("down", |_: ()| Err::<(), _>(TestError::Timeout(0)));

        let _ = executor.execute(&target, ());
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_async_retry_success_after_failures() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .backoff(Backoff::None)
            .build()
            .unwrap();
        let (executor, sleeper) = quiet_executor(policy);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let target = non_blocking("flaky", move |x: u32| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(TestError::Timeout(n)) } else { Ok(x + 1) }
            }
        });

        assert_eq!(executor.execute_async(&target, 1).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_async_retry_surfaces_last_error() {
        let policy = RetryPolicy::builder()
            .max_attempts(2)
            .backoff(Backoff::None)
            .build()
            .unwrap();
        let (executor, _) = quiet_executor(policy);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let target = non_blocking("down", move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(TestError::Timeout(n))
            }
        });

        assert_eq!(
            executor.execute_async(&target, ()).await,
            Err(TestError::Timeout(2))
        );
    }
}
