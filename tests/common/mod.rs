//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use class_scribe::config::{Config, RetryConfig};
use class_scribe::delivery::{
    CalendarEventBody, CalendarService, CalendarTarget, RemoteItem, TaskBody, TaskService,
    TaskTarget,
};
use class_scribe::error::{DeliveryError, LlmError};
use class_scribe::llm::LanguageModel;
use class_scribe::pipeline::{Dependencies, Orchestrator};
use class_scribe::store::LibSqlBackend;

// ── Calendar ────────────────────────────────────────────────────────

/// Keeps every inserted event; optionally fails every call with a 503.
#[derive(Default)]
pub struct FakeCalendar {
    pub events: Mutex<Vec<CalendarEventBody>>,
    pub create_calls: AtomicUsize,
    pub failing: bool,
}

impl FakeCalendar {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<CalendarEventBody> {
        self.events.lock().unwrap().clone()
    }
}

fn unavailable(service: &str) -> DeliveryError {
    DeliveryError::Http {
        service: service.into(),
        status: 503,
        body: "backend unavailable".into(),
    }
}

#[async_trait]
impl CalendarService for FakeCalendar {
    async fn create_event(&self, body: &CalendarEventBody) -> Result<String, DeliveryError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(unavailable("calendar"));
        }
        self.events.lock().unwrap().push(body.clone());
        Ok(format!("evt-{}", n + 1))
    }

    async fn list_events(
        &self,
        _time_min: NaiveDateTime,
        _time_max: NaiveDateTime,
    ) -> Result<Vec<RemoteItem>, DeliveryError> {
        if self.failing {
            return Err(unavailable("calendar"));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, e)| RemoteItem::new(format!("evt-{}", i + 1), e.summary.clone()))
            .collect())
    }
}

// ── Tasks ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeTasks {
    pub tasks: Mutex<Vec<TaskBody>>,
    pub create_calls: AtomicUsize,
}

impl FakeTasks {
    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<TaskBody> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskService for FakeTasks {
    async fn create_task(&self, body: &TaskBody) -> Result<String, DeliveryError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push(body.clone());
        Ok(format!("task-{}", n + 1))
    }

    async fn list_open_tasks(&self) -> Result<Vec<RemoteItem>, DeliveryError> {
        Ok(Vec::new())
    }
}

// ── Language model ──────────────────────────────────────────────────

/// Always gives the same answer and counts how often it was asked.
pub struct CountingModel {
    reply: String,
    calls: AtomicUsize,
}

impl CountingModel {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for CountingModel {
    fn model_name(&self) -> &str {
        "counting"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// Production defaults with retries that do not sleep.
pub fn test_config() -> Config {
    Config {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 2,
        },
        ..Config::default()
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub db: Arc<LibSqlBackend>,
    pub calendar: Arc<FakeCalendar>,
    pub tasks: Arc<FakeTasks>,
}

pub async fn harness(
    calendar: FakeCalendar,
    model: Option<Arc<dyn LanguageModel>>,
) -> Harness {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let calendar = Arc::new(calendar);
    let tasks = Arc::new(FakeTasks::default());

    let orchestrator = Orchestrator::new(
        &test_config(),
        Dependencies {
            db: db.clone(),
            model,
            calendar: Arc::new(CalendarTarget::new(calendar.clone(), "UTC")),
            tasks: Arc::new(TaskTarget::new(tasks.clone())),
        },
    );

    Harness {
        orchestrator: Arc::new(orchestrator),
        db,
        calendar,
        tasks,
    }
}
