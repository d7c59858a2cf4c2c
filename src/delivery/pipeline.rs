//! Delivery of one candidate event to one downstream service.
//!
//! Order of checks: event time, circuit breaker, duplicate lookup, then the
//! retried create. Every failure ends in the dead-letter table; none is
//! returned to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::delivery::breaker::{BreakerError, BreakerSnapshot, CircuitBreaker};
use crate::delivery::retry::{RetryExhausted, RetryPolicy};
use crate::error::DeliveryError;
use crate::extract::CandidateEvent;
use crate::store::{Database, DeliveryKind, DeliveryRecord, MessageKey};

/// An item already present downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    /// Day the item is due on, where the service reports one.
    pub due: Option<NaiveDate>,
}

impl RemoteItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            due: None,
        }
    }

    pub fn with_due(mut self, due: Option<NaiveDate>) -> Self {
        self.due = due;
        self
    }
}

/// A downstream service that candidate events are filed into.
#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    fn kind(&self) -> DeliveryKind;

    /// Name used for the breaker and in errors.
    fn service_name(&self) -> &str;

    /// Titles of existing items that could duplicate an item at `at`.
    async fn existing_titles(&self, at: NaiveDateTime) -> Result<Vec<String>, DeliveryError>;

    /// Create the item and return its downstream id.
    async fn create(&self, candidate: &CandidateEvent, at: NaiveDateTime)
    -> Result<String, DeliveryError>;
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Created { remote_id: String },
    /// A similar item already exists on the same day.
    Duplicate,
    /// No event time, so nothing to file.
    Skipped,
    /// Dead-lettered.
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::Created { remote_id } => Some(remote_id),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Circuit breaker + retry + dead letters around one [`DeliveryTarget`].
pub struct DeliveryPipeline<C: Clock = SystemClock> {
    target: Arc<dyn DeliveryTarget>,
    breaker: CircuitBreaker<C>,
    retry: RetryPolicy,
    db: Arc<dyn Database>,
}

impl<C: Clock> DeliveryPipeline<C> {
    pub fn new(
        target: Arc<dyn DeliveryTarget>,
        breaker: CircuitBreaker<C>,
        retry: RetryPolicy,
        db: Arc<dyn Database>,
    ) -> Self {
        Self {
            target,
            breaker,
            retry,
            db,
        }
    }

    pub fn kind(&self) -> DeliveryKind {
        self.target.kind()
    }

    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub async fn deliver(&self, key: MessageKey, candidate: &CandidateEvent) -> DeliveryOutcome {
        let service = self.target.service_name();
        let Some(at) = candidate.event_time() else {
            debug!(service, title = %candidate.title, "No event time, skipping delivery");
            return DeliveryOutcome::Skipped;
        };

        let result = self
            .breaker
            .call(
                || async {
                    if self.is_duplicate(candidate, at).await {
                        return Ok(None);
                    }
                    self.retry
                        .run(|| self.target.create(candidate, at), DeliveryError::is_transient)
                        .await
                        .map(Some)
                },
                |e: &RetryExhausted<DeliveryError>| e.error.is_transient(),
            )
            .await;

        match result {
            Ok(Some(remote_id)) => {
                self.record_delivery(key, candidate, &remote_id).await;
                info!(service, key = %key, remote_id = %remote_id, title = %candidate.title, "Delivered");
                DeliveryOutcome::Created { remote_id }
            }
            Ok(None) => {
                info!(service, key = %key, title = %candidate.title, "Duplicate detected, skipping");
                DeliveryOutcome::Duplicate
            }
            Err(BreakerError::Open) => {
                let err = DeliveryError::CircuitOpen {
                    service: service.to_string(),
                };
                warn!(service, key = %key, "Circuit open, delivery rejected");
                self.dead_letter(key, candidate, &err, 0).await;
                DeliveryOutcome::Failed {
                    error: err.to_string(),
                }
            }
            Err(BreakerError::Inner(RetryExhausted { error, attempts })) => {
                warn!(service, key = %key, attempts, error = %error, "Delivery failed");
                self.dead_letter(key, candidate, &error, attempts).await;
                DeliveryOutcome::Failed {
                    error: error.to_string(),
                }
            }
        }
    }

    /// Case-insensitive substring match either way. A failed lookup
    /// counts as no duplicate.
    async fn is_duplicate(&self, candidate: &CandidateEvent, at: NaiveDateTime) -> bool {
        match self.target.existing_titles(at).await {
            Ok(titles) => titles_overlap(&candidate.title, &titles),
            Err(e) => {
                warn!(service = self.target.service_name(), error = %e, "Duplicate check failed");
                false
            }
        }
    }

    async fn record_delivery(&self, key: MessageKey, candidate: &CandidateEvent, remote_id: &str) {
        let record = DeliveryRecord {
            event_id: Uuid::new_v4().to_string(),
            kind: self.target.kind(),
            title: candidate.title.clone(),
            source: key,
            created_at: Utc::now(),
            remote_id: remote_id.to_string(),
        };
        if let Err(e) = self.db.insert_delivery(&record).await {
            error!(key = %key, remote_id, error = %e, "Failed to record delivery");
        }
    }

    async fn dead_letter(
        &self,
        key: MessageKey,
        candidate: &CandidateEvent,
        err: &DeliveryError,
        attempts: u32,
    ) {
        let metadata = json!({
            "operation": self.target.kind().operation(),
            "title": candidate.title,
            "attempts": attempts,
        });
        if let Err(e) = self
            .db
            .insert_dead_letter(key, &candidate.source_text, &err.to_string(), &metadata)
            .await
        {
            error!(key = %key, error = %e, "Failed to write dead letter");
        }
    }
}

/// True when `title` and any existing title contain one another,
/// ignoring case. Short titles over-match ("Lab" against "Lab 2"), and a
/// blank existing title matches everything.
pub fn titles_overlap(title: &str, existing: &[String]) -> bool {
    let title = title.to_lowercase();
    existing.iter().any(|other| {
        let other = other.to_lowercase();
        title.contains(&other) || other.contains(&title)
    })
}

/// Stand-in for a service with no credentials. Every create fails with a
/// non-transient error, so the item is dead-lettered without tripping the
/// breaker.
pub struct UnconfiguredTarget {
    kind: DeliveryKind,
    service: String,
}

impl UnconfiguredTarget {
    pub fn new(kind: DeliveryKind, service: impl Into<String>) -> Self {
        Self {
            kind,
            service: service.into(),
        }
    }

    fn error(&self) -> DeliveryError {
        DeliveryError::Validation {
            service: self.service.clone(),
            reason: "no access token configured".to_string(),
        }
    }
}

#[async_trait]
impl DeliveryTarget for UnconfiguredTarget {
    fn kind(&self) -> DeliveryKind {
        self.kind
    }

    fn service_name(&self) -> &str {
        &self.service
    }

    async fn existing_titles(&self, _at: NaiveDateTime) -> Result<Vec<String>, DeliveryError> {
        Ok(Vec::new())
    }

    async fn create(
        &self,
        _candidate: &CandidateEvent,
        _at: NaiveDateTime,
    ) -> Result<String, DeliveryError> {
        Err(self.error())
    }
}
