//! Health checks aggregated into healthy / degraded / unhealthy.
//!
//! A failing critical check makes the whole service unhealthy. A failing
//! non-critical check only degrades it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::delivery::{CircuitState, DeliveryPipeline};
use crate::store::Database;

/// Dead-letter backlog above which the service reports degraded.
pub const DEAD_LETTER_WARN_THRESHOLD: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of one named check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// Healthy or degraded.
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Status: {}", self.status)];
        for check in &self.checks {
            lines.push(format!("  {}: {} ({})", check.name, check.status, check.message));
        }
        lines.join("\n")
    }
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn critical(&self) -> bool;

    async fn check(&self) -> (HealthStatus, String);
}

#[derive(Default)]
pub struct HealthChecker {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, check: impl HealthCheck + 'static) {
        tracing::debug!(check = check.name(), "Registered health check");
        self.checks.push(Box::new(check));
    }

    pub async fn run_all(&self) -> HealthReport {
        let mut results = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let (status, message) = check.check().await;
            results.push(CheckResult {
                name: check.name().to_string(),
                status,
                message,
                critical: check.critical(),
            });
        }
        HealthReport {
            status: aggregate(&results),
            timestamp: Utc::now(),
            checks: results,
        }
    }
}

/// Worst status, except that non-critical checks cap at degraded.
pub fn aggregate(results: &[CheckResult]) -> HealthStatus {
    results
        .iter()
        .map(|r| match (r.status, r.critical) {
            (HealthStatus::Unhealthy, false) => HealthStatus::Degraded,
            (status, _) => status,
        })
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

// ── Checks ──────────────────────────────────────────────────────────

/// Database reachable. Critical.
pub struct DatabaseCheck(pub Arc<dyn Database>);

#[async_trait]
impl HealthCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> (HealthStatus, String) {
        match self.0.ping().await {
            Ok(()) => (HealthStatus::Healthy, "reachable".into()),
            Err(e) => (HealthStatus::Unhealthy, e.to_string()),
        }
    }
}

/// Circuit breaker state of one delivery pipeline.
pub struct BreakerCheck {
    name: String,
    pipeline: Arc<DeliveryPipeline>,
}

impl BreakerCheck {
    pub fn new(pipeline: Arc<DeliveryPipeline>) -> Self {
        Self {
            name: format!("{}_breaker", pipeline.kind()),
            pipeline,
        }
    }
}

#[async_trait]
impl HealthCheck for BreakerCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> (HealthStatus, String) {
        let snapshot = self.pipeline.breaker_snapshot();
        let status = match snapshot.state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unhealthy,
        };
        let message = format!(
            "{} ({} consecutive failures)",
            snapshot.state, snapshot.consecutive_failures
        );
        (status, message)
    }
}

/// Language model presence. Switched off on purpose is fine; switched on
/// without a usable model is degraded.
pub struct LlmCheck {
    pub enabled: bool,
    pub available: bool,
}

#[async_trait]
impl HealthCheck for LlmCheck {
    fn name(&self) -> &str {
        "llm"
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> (HealthStatus, String) {
        match (self.enabled, self.available) {
            (_, true) => (HealthStatus::Healthy, "configured".into()),
            (false, false) => (HealthStatus::Healthy, "disabled".into()),
            (true, false) => (HealthStatus::Degraded, "enabled but no API key".into()),
        }
    }
}

/// Dead-letter backlog size.
pub struct DeadLetterCheck {
    db: Arc<dyn Database>,
    threshold: u64,
}

impl DeadLetterCheck {
    pub fn new(db: Arc<dyn Database>, threshold: u64) -> Self {
        Self { db, threshold }
    }
}

#[async_trait]
impl HealthCheck for DeadLetterCheck {
    fn name(&self) -> &str {
        "dead_letters"
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> (HealthStatus, String) {
        match self.db.count_dead_letters().await {
            Ok(n) if n > self.threshold => (HealthStatus::Degraded, format!("{n} queued")),
            Ok(n) => (HealthStatus::Healthy, format!("{n} queued")),
            Err(e) => (HealthStatus::Unhealthy, e.to_string()),
        }
    }
}
