//! Sliding-window admission control per sender identity.
//!
//! Each identity keeps the timestamps of its admitted requests for the last
//! 24 hours. The minute, hour and day windows are independent counts over
//! that one list, so a burst is capped as soon as it hits the minute limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    fn deny(window: &str) -> Self {
        Self {
            allowed: false,
            reason: format!("Rate limit exceeded: too many requests per {window}"),
        }
    }
}

/// Window counts for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateStats {
    pub last_minute: usize,
    pub last_hour: usize,
    pub last_day: usize,
    pub max_per_minute: usize,
    pub max_per_hour: usize,
    pub max_per_day: usize,
}

/// Process-local sliding-window rate limiter.
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        Self {
            config,
            requests: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Check the windows for `identity` and, if admitted, record the request.
    pub fn is_allowed(&self, identity: &str) -> RateDecision {
        let now = self.clock.now();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let history = requests.entry(identity.to_string()).or_default();

        prune(history, now);

        let windows = [
            (MINUTE, self.config.per_minute, "minute"),
            (HOUR, self.config.per_hour, "hour"),
            (DAY, self.config.per_day, "day"),
        ];
        for (window, limit, label) in windows {
            if count_within(history, now, window) >= limit {
                warn!(identity, window = label, limit, "Rate limit exceeded");
                return RateDecision::deny(label);
            }
        }

        history.push_back(now);
        debug!(identity, recent = history.len(), "Request admitted");
        RateDecision::allow()
    }

    pub fn stats(&self, identity: &str) -> RateStats {
        let now = self.clock.now();
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let (minute, hour, day) = match requests.get(identity) {
            Some(history) => (
                count_within(history, now, MINUTE),
                count_within(history, now, HOUR),
                count_within(history, now, DAY),
            ),
            None => (0, 0, 0),
        };
        RateStats {
            last_minute: minute,
            last_hour: hour,
            last_day: day,
            max_per_minute: self.config.per_minute,
            max_per_hour: self.config.per_hour,
            max_per_day: self.config.per_day,
        }
    }

    /// Forget one identity, or everyone when `None`.
    pub fn reset(&self, identity: Option<&str>) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        match identity {
            Some(id) => {
                requests.remove(id);
            }
            None => requests.clear(),
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Drop timestamps older than a day. The deque is in arrival order.
fn prune(history: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&oldest) = history.front() {
        if now.saturating_duration_since(oldest) >= DAY {
            history.pop_front();
        } else {
            break;
        }
    }
}

fn count_within(history: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    history
        .iter()
        .rev()
        .take_while(|&&ts| now.saturating_duration_since(ts) < window)
        .count()
}
