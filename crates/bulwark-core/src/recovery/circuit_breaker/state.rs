//! State machine shared by both circuit breaker variants.
//!
//! [`BreakerCore`] holds no lock of its own; each variant wraps it in the mutex
//! suited to its execution model and keeps the lock only for the duration of
//! one `admit` or `record` step, never across the protected call.

use std::error::Error as StdError;
use std::time::Instant;

use super::types::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::recovery::ErrorKinds;

/// Permission to run one protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    generation: u64,
    trial: bool,
}

/// Settles tickets whose call never reported an outcome
pub(crate) trait Abandon {
    fn abandon(&self, ticket: Ticket);
}

/// An admitted call in flight.
///
/// Dropped without [`Permit::finish`] (the operation panicked or its future
/// was cancelled), it hands the ticket back to the breaker as
/// [`Outcome::Ignored`] so a half-open trial slot is never leaked.
pub(crate) struct Permit<'a, B: Abandon> {
    ticket: Ticket,
    armed: bool,
    breaker: &'a B,
}

impl<'a, B: Abandon> Permit<'a, B> {
    pub(crate) fn new(ticket: Ticket, breaker: &'a B) -> Self {
        Self {
            ticket,
            armed: true,
            breaker,
        }
    }

    /// The call returned; its outcome is recorded by the caller
    pub(crate) fn finish(mut self) -> Ticket {
        self.armed = false;
        self.ticket
    }
}

impl<B: Abandon> Drop for Permit<'_, B> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon(self.ticket);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Admitted(Ticket),
    Rejected,
}

/// How a finished call affects the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    /// Failure with an expected error
    Failure,
    /// Failure with an error outside the expected set
    Ignored,
}

impl Outcome {
    pub(crate) fn of<T, E>(result: &Result<T, E>, expected: &ErrorKinds) -> Self
    where
        E: StdError + 'static,
    {
        match result {
            Ok(_) => Self::Success,
            Err(error) if expected.matches(error) => Self::Failure,
            Err(_) => Self::Ignored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Opened { failures: u32 },
    HalfOpened,
    Closed,
    Reset { from: CircuitState },
}

#[derive(Debug)]
pub(crate) struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every transition; outcomes of calls admitted in an earlier
    /// generation are discarded
    generation: u64,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerCore {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            trial_in_flight: false,
            generation: 0,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Decide whether a call may run.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here; the call that discovers this is still rejected and the next one
    /// becomes the trial.
    pub(crate) fn admit(
        &mut self,
        now: Instant,
        config: &CircuitBreakerConfig,
    ) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (self.issue(false), None),
            CircuitState::Open => {
                let recovered = self.opened_at.is_none_or(|opened_at| {
                    now.saturating_duration_since(opened_at) >= config.recovery_timeout
                });
                self.rejected_calls += 1;
                if recovered {
                    self.enter(CircuitState::HalfOpen);
                    (Admission::Rejected, Some(Transition::HalfOpened))
                } else {
                    (Admission::Rejected, None)
                }
            }
            CircuitState::HalfOpen if self.trial_in_flight => {
                self.rejected_calls += 1;
                (Admission::Rejected, None)
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                (self.issue(true), None)
            }
        }
    }

    /// Apply the outcome of an admitted call
    pub(crate) fn record(
        &mut self,
        ticket: Ticket,
        outcome: Outcome,
        now: Instant,
        config: &CircuitBreakerConfig,
    ) -> Option<Transition> {
        if outcome == Outcome::Failure {
            self.total_failures += 1;
        }
        if ticket.generation != self.generation {
            return None;
        }

        match (self.state, outcome) {
            (_, Outcome::Ignored) => {
                if ticket.trial {
                    self.trial_in_flight = false;
                }
                None
            }
            (CircuitState::Closed, Outcome::Success) => {
                self.failure_count = 0;
                None
            }
            (CircuitState::HalfOpen, Outcome::Success) => {
                self.close();
                Some(Transition::Closed)
            }
            (CircuitState::Closed, Outcome::Failure) => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.open(now);
                    Some(Transition::Opened {
                        failures: self.failure_count,
                    })
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Outcome::Failure) => {
                self.failure_count += 1;
                self.open(now);
                Some(Transition::Opened {
                    failures: self.failure_count,
                })
            }
            // Open circuits admit nothing, so a current-generation outcome
            // cannot arrive here
            (CircuitState::Open, _) => None,
        }
    }

    /// Force the circuit closed with a zero failure count
    pub(crate) fn reset(&mut self) -> Transition {
        let from = self.state;
        self.close();
        Transition::Reset { from }
    }

    /// Force the circuit open
    pub(crate) fn trip(&mut self, now: Instant) -> Transition {
        self.open(now);
        Transition::Opened {
            failures: self.failure_count,
        }
    }

    pub(crate) fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state,
            failure_count: self.failure_count,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            rejected_calls: self.rejected_calls,
            opened_at: self.opened_at,
        }
    }

    fn issue(&mut self, trial: bool) -> Admission {
        self.total_calls += 1;
        Admission::Admitted(Ticket {
            generation: self.generation,
            trial,
        })
    }

    fn open(&mut self, now: Instant) {
        self.enter(CircuitState::Open);
        self.opened_at = Some(now);
    }

    fn close(&mut self) {
        self.enter(CircuitState::Closed);
        self.failure_count = 0;
        self.opened_at = None;
    }

    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.trial_in_flight = false;
        self.generation += 1;
    }
}

pub(crate) fn log_transition(circuit: &str, transition: Transition) {
    match transition {
        Transition::Opened { failures } => {
            tracing::warn!(circuit, "Circuit breaker opened after {} failures", failures);
        }
        Transition::HalfOpened => {
            tracing::info!(circuit, "Circuit breaker transitioning to half-open");
        }
        Transition::Closed => {
            tracing::info!(circuit, "Circuit breaker closed");
        }
        Transition::Reset { from } => {
            tracing::info!(circuit, %from, "Circuit breaker reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(threshold: u32, timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(threshold, timeout)
    }

    struct Collector(std::cell::RefCell<Vec<Ticket>>);

    impl Abandon for Collector {
        fn abandon(&self, ticket: Ticket) {
            self.0.borrow_mut().push(ticket);
        }
    }

    fn admitted(admission: Admission) -> Ticket {
        match admission {
            Admission::Admitted(ticket) => ticket,
            Admission::Rejected => panic!("call was rejected"),
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let cfg = config(2, Duration::from_secs(10));
        let now = Instant::now();
        let mut core = BreakerCore::new();

        let ticket = admitted(core.admit(now, &cfg).0);
        assert_eq!(core.record(ticket, Outcome::Failure, now, &cfg), None);
        let ticket = admitted(core.admit(now, &cfg).0);
        assert_eq!(
            core.record(ticket, Outcome::Failure, now, &cfg),
            Some(Transition::Opened { failures: 2 })
        );
        assert_eq!(core.state(), CircuitState::Open);
        assert_eq!(core.admit(now, &cfg).0, Admission::Rejected);
    }

    #[test]
    fn test_success_resets_count() {
        let cfg = config(3, Duration::from_secs(10));
        let now = Instant::now();
        let mut core = BreakerCore::new();

        let ticket = admitted(core.admit(now, &cfg).0);
        core.record(ticket, Outcome::Failure, now, &cfg);
        assert_eq!(core.failure_count(), 1);

        let ticket = admitted(core.admit(now, &cfg).0);
        core.record(ticket, Outcome::Success, now, &cfg);
        assert_eq!(core.failure_count(), 0);
    }

    #[test]
    fn test_recovery_discovery_then_single_trial() {
        let cfg = config(1, Duration::from_secs(5));
        let start = Instant::now();
        let mut core = BreakerCore::new();

        let ticket = admitted(core.admit(start, &cfg).0);
        core.record(ticket, Outcome::Failure, start, &cfg);

        let later = start + Duration::from_secs(5);
        assert_eq!(
            core.admit(later, &cfg),
            (Admission::Rejected, Some(Transition::HalfOpened))
        );
        assert_eq!(core.state(), CircuitState::HalfOpen);

        let trial = admitted(core.admit(later, &cfg).0);
        // Concurrent callers wait for the trial's verdict
        assert_eq!(core.admit(later, &cfg).0, Admission::Rejected);

        assert_eq!(
            core.record(trial, Outcome::Success, later, &cfg),
            Some(Transition::Closed)
        );
        assert_eq!(core.state(), CircuitState::Closed);
        assert_eq!(core.failure_count(), 0);
    }

    #[test]
    fn test_ignored_trial_frees_the_slot() {
        let cfg = config(1, Duration::ZERO);
        let now = Instant::now();
        let mut core = BreakerCore::new();

        let ticket = admitted(core.admit(now, &cfg).0);
        core.record(ticket, Outcome::Failure, now, &cfg);
        core.admit(now, &cfg);

        let trial = admitted(core.admit(now, &cfg).0);
        assert_eq!(core.record(trial, Outcome::Ignored, now, &cfg), None);
        assert_eq!(core.state(), CircuitState::HalfOpen);
        assert!(matches!(core.admit(now, &cfg).0, Admission::Admitted(_)));
    }

    #[test]
    fn test_stale_outcome_after_reset_is_discarded() {
        let cfg = config(1, Duration::from_secs(10));
        let now = Instant::now();
        let mut core = BreakerCore::new();

        let ticket = admitted(core.admit(now, &cfg).0);
        core.reset();
        assert_eq!(core.record(ticket, Outcome::Failure, now, &cfg), None);
        assert_eq!(core.state(), CircuitState::Closed);
        assert_eq!(core.failure_count(), 0);
        assert_eq!(core.stats().total_failures, 1);
    }

    #[test]
    fn test_dropped_permit_hands_ticket_back() {
        let cfg = config(1, Duration::from_secs(10));
        let mut core = BreakerCore::new();
        let collector = Collector(Default::default());

        let ticket = admitted(core.admit(Instant::now(), &cfg).0);
        drop(Permit::new(ticket, &collector));
        assert_eq!(collector.0.borrow().as_slice(), &[ticket]);

        let finished = Permit::new(ticket, &collector).finish();
        assert_eq!(finished, ticket);
        assert_eq!(collector.0.borrow().len(), 1);
    }
}
