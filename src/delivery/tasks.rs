//! Task-list delivery target and the Google Tasks REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;

use crate::delivery::calendar::{SOURCE_EXCERPT_CHARS, excerpt};
use crate::delivery::google::{GoogleApi, items};
use crate::delivery::pipeline::{DeliveryTarget, RemoteItem};
use crate::error::DeliveryError;
use crate::extract::CandidateEvent;
use crate::store::DeliveryKind;

const GOOGLE_TASKS_BASE: &str = "https://tasks.googleapis.com/tasks/v1";

/// Minimal task-list API.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Insert a task, returning its id.
    async fn create_task(&self, body: &TaskBody) -> Result<String, DeliveryError>;

    /// Open (not completed) tasks.
    async fn list_open_tasks(&self) -> Result<Vec<RemoteItem>, DeliveryError>;
}

/// Task resource as the Tasks API expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskBody {
    pub title: String,
    pub notes: String,
    /// RFC 3339, always `.000Z`.
    pub due: String,
    pub status: String,
}

impl TaskBody {
    pub fn from_candidate(candidate: &CandidateEvent, due: NaiveDateTime) -> Self {
        let mut notes = Vec::new();
        if let Some(description) = &candidate.description {
            notes.push(description.clone());
        }
        if let Some(location) = &candidate.location {
            notes.push(format!("Location: {location}"));
        }
        notes.push(format!(
            "\nSource: {}",
            excerpt(&candidate.source_text, SOURCE_EXCERPT_CHARS)
        ));

        Self {
            title: candidate.title.clone(),
            notes: notes.join("\n"),
            due: due.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
            status: "needsAction".to_string(),
        }
    }
}

/// Files candidates as tasks.
pub struct TaskTarget {
    service: Arc<dyn TaskService>,
}

impl TaskTarget {
    pub fn new(service: Arc<dyn TaskService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DeliveryTarget for TaskTarget {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Task
    }

    fn service_name(&self) -> &str {
        "tasks"
    }

    /// Open tasks due on the same day. Tasks without a due date never match.
    async fn existing_titles(&self, at: NaiveDateTime) -> Result<Vec<String>, DeliveryError> {
        let day = at.date();
        let tasks = self.service.list_open_tasks().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.due == Some(day))
            .map(|t| t.title)
            .collect())
    }

    async fn create(
        &self,
        candidate: &CandidateEvent,
        at: NaiveDateTime,
    ) -> Result<String, DeliveryError> {
        self.service
            .create_task(&TaskBody::from_candidate(candidate, at))
            .await
    }
}

// ── Google Tasks client ─────────────────────────────────────────────

pub struct GoogleTasksClient {
    api: GoogleApi,
    task_list_id: String,
}

impl GoogleTasksClient {
    pub fn new(token: SecretString, task_list_id: impl Into<String>, timeout: Duration) -> Self {
        Self::with_base_url(GOOGLE_TASKS_BASE, token, task_list_id, timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: SecretString,
        task_list_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api: GoogleApi::new("tasks", base_url, token, timeout),
            task_list_id: task_list_id.into(),
        }
    }
}

#[async_trait]
impl TaskService for GoogleTasksClient {
    async fn create_task(&self, body: &TaskBody) -> Result<String, DeliveryError> {
        let url = self.api.url(&["lists", self.task_list_id.as_str(), "tasks"])?;
        let created = self.api.post(url, body).await?;
        self.api.created_id(&created)
    }

    async fn list_open_tasks(&self) -> Result<Vec<RemoteItem>, DeliveryError> {
        let url = self.api.url(&["lists", self.task_list_id.as_str(), "tasks"])?;
        let listed = self
            .api
            .get(url, &[("showCompleted", "false".to_string())])
            .await?;
        Ok(items(&listed).iter().filter_map(parse_task).collect())
    }
}

fn parse_task(item: &Value) -> Option<RemoteItem> {
    let id = item.get("id").and_then(Value::as_str)?;
    let title = item.get("title").and_then(Value::as_str).unwrap_or("");
    let due = item
        .get("due")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.date_naive());
    Some(RemoteItem::new(id, title).with_due(due))
}
