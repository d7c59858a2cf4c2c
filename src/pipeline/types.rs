//! Shared types for the message processing pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryOutcome;
use crate::extract::{CandidateEvent, EventKind};
use crate::store::MessageKey;

// ── Inbound message ─────────────────────────────────────────────────

/// A chat message as handed over by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    /// Absent for channel posts and anonymous admins.
    pub user_id: Option<i64>,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(message_id: i64, chat_id: i64, user_id: Option<i64>, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat_id,
            user_id,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.message_id, self.chat_id)
    }

    /// Rate-limit identity: `"{chat_id}:{user_id}"`, `-` for no user.
    pub fn identity(&self) -> String {
        match self.user_id {
            Some(user) => format!("{}:{user}", self.chat_id),
            None => format!("{}:-", self.chat_id),
        }
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// What `Orchestrator::handle` did with one message.
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// Failed input validation. Not recorded in the ledger.
    Invalid { reason: String },
    /// Over the per-identity limit. Not recorded in the ledger.
    RateLimited { reason: String },
    /// Recorded earlier or being handled by another flow.
    AlreadyProcessed,
    /// Not school-related.
    Filtered,
    /// Neither extractor produced a candidate.
    NoCandidate,
    Processed(ProcessedEvent),
}

impl HandleOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid",
            Self::RateLimited { .. } => "rate_limited",
            Self::AlreadyProcessed => "already_processed",
            Self::Filtered => "filtered",
            Self::NoCandidate => "no_candidate",
            Self::Processed(_) => "processed",
        }
    }

    pub fn confirmation(&self) -> Option<&Confirmation> {
        match self {
            Self::Processed(event) => event.confirmation.as_ref(),
            _ => None,
        }
    }

    /// Text to send back to the chat. Only confirmations are sent; every
    /// other outcome stays silent.
    pub fn reply(&self) -> Option<String> {
        self.confirmation().map(ToString::to_string)
    }
}

/// A message that produced a candidate and went through delivery.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub candidate: CandidateEvent,
    /// `None` when no calendar delivery was attempted.
    pub calendar: Option<DeliveryOutcome>,
    /// `None` when no task delivery was attempted.
    pub task: Option<DeliveryOutcome>,
    pub confirmation: Option<Confirmation>,
}

impl ProcessedEvent {
    pub fn calendar_event_id(&self) -> Option<&str> {
        self.calendar.as_ref().and_then(DeliveryOutcome::remote_id)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task.as_ref().and_then(DeliveryOutcome::remote_id)
    }
}

// ── Confirmation ────────────────────────────────────────────────────

/// Reply sent back to the chat after a (partially) successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    pub title: String,
    pub kind: EventKind,
    pub occurs_at: Option<NaiveDateTime>,
    pub due_at: Option<NaiveDateTime>,
    pub calendar_event_id: Option<String>,
    pub task_id: Option<String>,
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extracted: {}\nType: {}", self.title, self.kind.title_case())?;
        if let Some(at) = self.occurs_at {
            write!(f, "\nDate: {}", at.format("%Y-%m-%d %H:%M"))?;
        }
        if let Some(due) = self.due_at {
            write!(f, "\nDue: {}", due.format("%Y-%m-%d %H:%M"))?;
        }
        if self.calendar_event_id.is_some() {
            write!(f, "\nCalendar event created")?;
        }
        if self.task_id.is_some() {
            write!(f, "\nTask created")?;
        }
        Ok(())
    }
}
