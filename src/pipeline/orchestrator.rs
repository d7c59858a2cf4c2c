//! Per-message flow: validate → rate limit → ledger → filter → arbitrate →
//! deliver → record → confirm.
//!
//! Only ledger failures come back as `Err`. Every other problem is turned
//! into a [`HandleOutcome`] or handled inside the delivery pipelines.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::CacheStats;
use crate::config::Config;
use crate::delivery::{BreakerSnapshot, DeliveryOutcome, DeliveryPipeline, DeliveryTarget};
use crate::delivery::{CircuitBreaker, RetryPolicy};
use crate::error::PipelineError;
use crate::extract::{Arbiter, CandidateEvent, ContentFilter, EventKind, LlmExtractor, PatternExtractor};
use crate::health::{
    BreakerCheck, DEAD_LETTER_WARN_THRESHOLD, DatabaseCheck, DeadLetterCheck, HealthChecker,
    HealthReport, LlmCheck,
};
use crate::llm::LanguageModel;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::pipeline::types::{Confirmation, HandleOutcome, IncomingMessage, ProcessedEvent};
use crate::ratelimit::RateLimiter;
use crate::safety::InputValidator;
use crate::store::{Database, DeadLetter, IdempotencyLedger, LedgerStats, MessageKey, ProcessedRecord};

/// External collaborators the orchestrator is wired to.
pub struct Dependencies {
    pub db: Arc<dyn Database>,
    /// `None` disables the probabilistic extractor.
    pub model: Option<Arc<dyn LanguageModel>>,
    pub calendar: Arc<dyn DeliveryTarget>,
    pub tasks: Arc<dyn DeliveryTarget>,
}

/// In-memory component state for `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub calendar: BreakerSnapshot,
    pub tasks: BreakerSnapshot,
    pub llm_available: bool,
    pub llm_cache: CacheStats,
    pub tracked_identities: usize,
    pub in_flight: usize,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status")?;
        for (label, b) in [("Calendar", &self.calendar), ("Tasks", &self.tasks)] {
            writeln!(
                f,
                "{label}: {} ({} consecutive failures, {} calls, {} rejected)",
                b.state, b.consecutive_failures, b.total_calls, b.rejected_calls
            )?;
        }
        writeln!(
            f,
            "LLM: {} (cache {} entries, {:.0}% hit rate)",
            if self.llm_available { "available" } else { "unavailable" },
            self.llm_cache.size,
            self.llm_cache.hit_rate()
        )?;
        writeln!(f, "Rate-limited identities: {}", self.tracked_identities)?;
        write!(f, "In flight: {}", self.in_flight)
    }
}

pub struct Orchestrator {
    validator: InputValidator,
    rate_limiter: RateLimiter,
    ledger: IdempotencyLedger,
    filter: ContentFilter,
    min_length: usize,
    arbiter: Arbiter,
    llm: Arc<LlmExtractor>,
    calendar: Arc<DeliveryPipeline>,
    tasks: Arc<DeliveryPipeline>,
    db: Arc<dyn Database>,
    metrics: MetricsCollector,
    health: HealthChecker,
}

impl Orchestrator {
    pub fn new(config: &Config, deps: Dependencies) -> Self {
        let Dependencies {
            db,
            model,
            calendar,
            tasks,
        } = deps;

        let llm = Arc::new(LlmExtractor::new(model, config.llm.enabled, config.llm.cache_ttl));
        let arbiter = Arbiter::new(Arc::new(PatternExtractor::new()), llm.clone());

        let pipeline = |target: Arc<dyn DeliveryTarget>| {
            let breaker = CircuitBreaker::new(target.service_name(), config.breaker.clone());
            Arc::new(DeliveryPipeline::new(
                target,
                breaker,
                RetryPolicy::new(&config.retry),
                db.clone(),
            ))
        };
        let calendar = pipeline(calendar);
        let tasks = pipeline(tasks);

        let mut health = HealthChecker::new();
        health.register(DatabaseCheck(db.clone()));
        health.register(BreakerCheck::new(calendar.clone()));
        health.register(BreakerCheck::new(tasks.clone()));
        health.register(LlmCheck {
            enabled: llm.is_enabled(),
            available: llm.is_available(),
        });
        health.register(DeadLetterCheck::new(db.clone(), DEAD_LETTER_WARN_THRESHOLD));

        Self {
            validator: InputValidator::new(config.filter.max_message_length),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            ledger: IdempotencyLedger::new(db.clone()),
            filter: ContentFilter::new(),
            min_length: config.filter.min_length,
            arbiter,
            llm,
            calendar,
            tasks,
            db,
            metrics: MetricsCollector::new(),
            health,
        }
    }

    /// Process one message end to end.
    pub async fn handle(&self, message: &IncomingMessage) -> Result<HandleOutcome, PipelineError> {
        let _timer = self.metrics.time("handle_message");
        self.metrics.increment("messages_received");

        let outcome = self.run(message).await;
        match &outcome {
            Ok(outcome) => {
                self.metrics.increment(&format!("outcome_{}", outcome.label()));
                debug!(key = %message.key(), outcome = outcome.label(), "Message handled");
            }
            Err(e) => {
                self.metrics.increment("ledger_errors");
                warn!(key = %message.key(), error = %e, "Message handling aborted");
            }
        }
        outcome
    }

    async fn run(&self, message: &IncomingMessage) -> Result<HandleOutcome, PipelineError> {
        let key = message.key();

        if let Err(e) = self.validator.validate(&message.text) {
            warn!(key = %key, error = %e, "Message failed validation");
            return Ok(HandleOutcome::Invalid {
                reason: e.to_string(),
            });
        }
        let text = self.validator.sanitize(&message.text);

        let identity = message.identity();
        let decision = self.rate_limiter.is_allowed(&identity);
        if !decision.allowed {
            return Ok(HandleOutcome::RateLimited {
                reason: decision.reason,
            });
        }

        let Some(_guard) = self.ledger.begin(key).await? else {
            return Ok(HandleOutcome::AlreadyProcessed);
        };

        if !self.filter.should_process(&text, self.min_length) {
            debug!(key = %key, "Message filtered out");
            self.ledger
                .record(key, message.user_id, &text, false, None, None)
                .await?;
            return Ok(HandleOutcome::Filtered);
        }

        let candidate = {
            let _timer = self.metrics.time("extraction");
            self.arbiter.decide(&text).await
        };
        let Some(candidate) = candidate else {
            debug!(key = %key, "No candidate extracted");
            self.ledger
                .record(key, message.user_id, &text, false, None, None)
                .await?;
            return Ok(HandleOutcome::NoCandidate);
        };

        info!(
            key = %key,
            title = %candidate.title,
            kind = %candidate.kind,
            confidence = candidate.confidence(),
            source = candidate.source.as_str(),
            "Candidate extracted"
        );
        self.metrics
            .increment(&format!("extracted_{}", candidate.source.as_str()));

        let (calendar, task) = {
            let _timer = self.metrics.time("delivery");
            tokio::join!(
                async {
                    if candidate.has_date() {
                        Some(self.calendar.deliver(key, &candidate).await)
                    } else {
                        None
                    }
                },
                async {
                    if candidate.kind == EventKind::Assignment {
                        Some(self.tasks.deliver(key, &candidate).await)
                    } else {
                        None
                    }
                }
            )
        };
        self.count_delivery("calendar", calendar.as_ref());
        self.count_delivery("task", task.as_ref());

        let event = ProcessedEvent {
            confirmation: None,
            candidate,
            calendar,
            task,
        };
        self.ledger
            .record(
                key,
                message.user_id,
                &text,
                true,
                event.calendar_event_id().map(str::to_string),
                event.task_id().map(str::to_string),
            )
            .await?;

        let confirmation = should_confirm(event.calendar.as_ref(), event.task.as_ref())
            .then(|| confirmation_for(&event.candidate, &event));
        Ok(HandleOutcome::Processed(ProcessedEvent {
            confirmation,
            ..event
        }))
    }

    fn count_delivery(&self, target: &str, outcome: Option<&DeliveryOutcome>) {
        let label = match outcome {
            None => return,
            Some(DeliveryOutcome::Created { .. }) => "created",
            Some(DeliveryOutcome::Duplicate) => "duplicate",
            Some(DeliveryOutcome::Skipped) => "skipped",
            Some(DeliveryOutcome::Failed { .. }) => "failed",
        };
        self.metrics.increment(&format!("{target}_{label}"));
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn status(&self) -> StatusReport {
        StatusReport {
            calendar: self.calendar.breaker_snapshot(),
            tasks: self.tasks.breaker_snapshot(),
            llm_available: self.llm.is_available(),
            llm_cache: self.llm.cache_stats(),
            tracked_identities: self.rate_limiter.tracked_identities(),
            in_flight: self.ledger.in_flight_count(),
        }
    }

    pub async fn statistics(&self) -> Result<LedgerStats, PipelineError> {
        Ok(self.db.statistics().await?)
    }

    pub async fn health(&self) -> HealthReport {
        self.health.run_all().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_summary(&self) -> String {
        self.metrics.summary()
    }

    pub async fn recent_messages(
        &self,
        chat_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ProcessedRecord>, PipelineError> {
        Ok(self.db.recent_processed(chat_id, limit).await?)
    }

    pub async fn dead_letters(
        &self,
        chat_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, PipelineError> {
        Ok(self.db.list_dead_letters(chat_id, limit).await?)
    }

    // ── Admin ───────────────────────────────────────────────────────

    pub async fn clear_dead_letter(&self, key: MessageKey) -> Result<u64, PipelineError> {
        Ok(self.db.delete_dead_letters(key).await?)
    }

    pub async fn clear_dead_letters(&self) -> Result<u64, PipelineError> {
        Ok(self.db.clear_dead_letters().await?)
    }
}

/// Confirm when something was created or nothing that was tried failed.
fn should_confirm(calendar: Option<&DeliveryOutcome>, task: Option<&DeliveryOutcome>) -> bool {
    let outcomes = [calendar, task];
    let created = outcomes
        .iter()
        .flatten()
        .any(|o| matches!(o, DeliveryOutcome::Created { .. }));
    let failed = outcomes.iter().flatten().any(|o| o.is_failed());
    created || !failed
}

fn confirmation_for(candidate: &CandidateEvent, event: &ProcessedEvent) -> Confirmation {
    Confirmation {
        title: candidate.title.clone(),
        kind: candidate.kind,
        occurs_at: candidate.occurs_at,
        due_at: candidate.due_at,
        calendar_event_id: event.calendar_event_id().map(str::to_string),
        task_id: event.task_id().map(str::to_string),
    }
}
