//! Time and sleep injection
//!
//! Retry backoff and breaker recovery read time through [`TimeSource`] and wait
//! through [`Sleeper`] / [`AsyncSleeper`], so tests can run deterministically
//! without touching the wall clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Monotonic time source
#[cfg_attr(test, mockall::automock)]
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Default time source shared by policies and breakers
pub fn system_clock() -> Arc<dyn TimeSource> {
    Arc::new(SystemClock)
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// Blocking sleep hook
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Non-blocking sleep hook
#[async_trait]
pub trait AsyncSleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Parks the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Yields to the tokio scheduler
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl AsyncSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested sleeps instead of waiting.
///
/// When built with [`RecordingSleeper::advancing`] every recorded sleep also
/// moves the given [`ManualClock`] forward.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advancing(clock: Arc<ManualClock>) -> Self {
        Self {
            delays: Mutex::new(Vec::new()),
            clock: Some(clock),
        }
    }

    /// Every delay requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.delays.lock().iter().sum()
    }

    fn record(&self, duration: Duration) {
        self.delays.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.record(duration);
    }
}

#[async_trait]
impl AsyncSleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.record(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_recording_sleeper_moves_clock() {
        let clock = Arc::new(ManualClock::new());
        let sleeper = RecordingSleeper::advancing(Arc::clone(&clock));

        Sleeper::sleep(&sleeper, Duration::from_millis(100));
        AsyncSleeper::sleep(&sleeper, Duration::from_millis(200)).await;

        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(sleeper.total(), Duration::from_millis(300));
        assert_eq!(clock.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn test_mock_time_source() {
        let fixed = Instant::now();
        let mut mock = MockTimeSource::new();
        mock.expect_now().times(2).return_const(fixed);

        assert_eq!(mock.now(), fixed);
        assert_eq!(mock.now(), fixed);
    }
}
