//! Circuit breaker guarding one downstream service.
//!
//! CLOSED counts consecutive failures and opens at the threshold. OPEN
//! rejects every call until the recovery timeout has passed, then lets
//! exactly one trial call through (HALF_OPEN). The trial's outcome decides
//! between CLOSED and another OPEN period.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BreakerConfig;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Why a guarded call did not produce a value.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without running the operation.
    Open,
    /// The operation ran and failed.
    Inner(E),
}

/// Point-in-time view for status and health queries.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
}

/// Outcome classes a finished call reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
    /// The call says nothing about service health.
    Neutral,
}

pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: C) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                trial_in_flight: false,
                total_calls: 0,
                rejected_calls: 0,
            }),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective state, with an expired OPEN period reported as HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.recovery_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            opened_at: inner.opened_at_wall,
        }
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// `is_failure` decides whether an error counts against the service.
    /// Errors it rejects (bad input, say) leave the failure count alone.
    pub async fn call<F, Fut, T, E>(
        &self,
        operation: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(mut permit) = self.try_acquire() else {
            return Err(BreakerError::Open);
        };

        match operation().await {
            Ok(value) => {
                permit.finish(Verdict::Success);
                Ok(value)
            }
            Err(error) => {
                let verdict = if is_failure(&error) {
                    Verdict::Failure
                } else {
                    Verdict::Neutral
                };
                permit.finish(verdict);
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Admit a call, moving OPEN to HALF_OPEN when the timeout has passed.
    fn try_acquire(&self) -> Option<Permit<'_, C>> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open && self.recovery_elapsed(&inner) {
            info!(breaker = %self.name, "Circuit breaker half-open, admitting trial call");
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
        }

        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => !inner.trial_in_flight,
        };

        if !admitted {
            inner.rejected_calls += 1;
            debug!(breaker = %self.name, state = %inner.state, "Circuit breaker rejecting call");
            return None;
        }

        inner.total_calls += 1;
        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            inner.trial_in_flight = true;
        }
        Some(Permit {
            breaker: self,
            trial,
            finished: false,
        })
    }

    fn complete(&self, trial: bool, verdict: Verdict) {
        let mut inner = self.lock();
        if trial {
            inner.trial_in_flight = false;
        }

        match (inner.state, verdict) {
            (_, Verdict::Neutral) => {}
            (CircuitState::HalfOpen, Verdict::Success) => {
                info!(breaker = %self.name, "Circuit breaker closed after successful trial");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.opened_at_wall = None;
            }
            (CircuitState::HalfOpen, Verdict::Failure) => {
                warn!(breaker = %self.name, "Probe failed, circuit breaker re-opened");
                self.open(&mut inner);
            }
            (CircuitState::Closed, Verdict::Success) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, Verdict::Failure) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    self.open(&mut inner);
                }
            }
            // A call admitted while CLOSED that finishes after another call
            // opened the circuit does not change anything.
            (CircuitState::Open, _) => {}
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(self.clock.now());
        inner.opened_at_wall = Some(Utc::now());
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner.opened_at.is_some_and(|opened| {
            self.clock.now().saturating_duration_since(opened) >= self.config.recovery_timeout
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An admitted call. Dropping it unfinished (cancelled future) releases the
/// trial slot without judging the service.
struct Permit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    trial: bool,
    finished: bool,
}

impl<C: Clock> Permit<'_, C> {
    fn finish(&mut self, verdict: Verdict) {
        self.finished = true;
        self.breaker.complete(self.trial, verdict);
    }
}

impl<C: Clock> Drop for Permit<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.complete(self.trial, Verdict::Neutral);
        }
    }
}
