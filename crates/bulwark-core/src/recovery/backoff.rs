//! Backoff strategies for retry operations
//!
//! Computes the delay between attempts. Attempts are 1-indexed: the delay
//! for `attempt` is the wait after the `attempt`-th call failed.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay shape between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    None,
    /// `base_delay * attempt`
    Linear,
    /// `base_delay * 2^(attempt - 1)`
    #[default]
    Exponential,
}

impl Backoff {
    /// Uncapped delay after the given (1-indexed) attempt.
    ///
    /// Saturates at [`Duration::MAX`] instead of overflowing.
    pub fn raw_delay(&self, base_delay: Duration, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Linear => base_delay.checked_mul(attempt).unwrap_or(Duration::MAX),
            Self::Exponential => 2u32
                .checked_pow(attempt - 1)
                .and_then(|factor| base_delay.checked_mul(factor))
                .unwrap_or(Duration::MAX),
        }
    }

    /// Delay after the given attempt, capped at `max_delay`
    pub fn delay(&self, base_delay: Duration, max_delay: Duration, attempt: u32) -> Duration {
        self.raw_delay(base_delay, attempt).min(max_delay)
    }
}

/// Pick a uniformly random delay in `[0, delay]`
pub fn full_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let fraction: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * fraction)
        .map_or(delay, |jittered| jittered.min(delay))
}
