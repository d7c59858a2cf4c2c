//! `Database` trait: single async interface for all durable state.
//!
//! Three tables sit behind it: the processed-message ledger, the
//! append-only delivery log, and the dead-letter queue.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;

/// Identity of a chat message: unique per `(message_id, chat_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageKey {
    pub message_id: i64,
    pub chat_id: i64,
}

impl MessageKey {
    pub fn new(message_id: i64, chat_id: i64) -> Self {
        Self {
            message_id,
            chat_id,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.message_id)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRecord {
    pub key: MessageKey,
    pub user_id: Option<i64>,
    pub message_text: String,
    pub processed_at: DateTime<Utc>,
    pub extraction_success: bool,
    pub event_id: Option<String>,
    pub task_id: Option<String>,
}

/// Downstream artifact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Calendar,
    Task,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Task => "task",
        }
    }

    /// Dead-letter operation tag for a failed create.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Calendar => "create_calendar_event",
            Self::Task => "create_task",
        }
    }
}

impl fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar" => Ok(Self::Calendar),
            "task" => Ok(Self::Task),
            other => Err(format!("unknown delivery kind '{other}'")),
        }
    }
}

/// Append-only record of an artifact created downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRecord {
    /// Internally generated UUID.
    pub event_id: String,
    pub kind: DeliveryKind,
    pub title: String,
    pub source: MessageKey,
    pub created_at: DateTime<Utc>,
    /// Id assigned by the downstream service.
    pub remote_id: String,
}

/// A failed delivery kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub key: MessageKey,
    pub message_text: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
    /// Free-form: `operation`, `title`, `attempts`.
    pub metadata: serde_json::Value,
}

/// Aggregate counts for `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total_messages: u64,
    pub successful_extractions: u64,
    pub total_deliveries: u64,
    pub deliveries_by_kind: BTreeMap<String, u64>,
    pub messages_by_chat: BTreeMap<i64, u64>,
    pub dead_letters: u64,
}

/// Backend-agnostic persistence.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Cheap round-trip used by health checks.
    async fn ping(&self) -> Result<(), DatabaseError>;

    // ── Ledger ──────────────────────────────────────────────────────

    async fn get_processed(&self, key: MessageKey) -> Result<Option<ProcessedRecord>, DatabaseError>;

    async fn is_processed(&self, key: MessageKey) -> Result<bool, DatabaseError> {
        Ok(self.get_processed(key).await?.is_some())
    }

    /// Insert, or replace the row with the same key.
    async fn upsert_processed(&self, record: &ProcessedRecord) -> Result<(), DatabaseError>;

    /// Newest first, optionally restricted to one chat.
    async fn recent_processed(
        &self,
        chat_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ProcessedRecord>, DatabaseError>;

    // ── Deliveries ──────────────────────────────────────────────────

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DatabaseError>;

    async fn deliveries_for(&self, key: MessageKey) -> Result<Vec<DeliveryRecord>, DatabaseError>;

    // ── Dead letters ────────────────────────────────────────────────

    /// Append a dead letter, returning its row id.
    async fn insert_dead_letter(
        &self,
        key: MessageKey,
        message_text: &str,
        error: &str,
        metadata: &serde_json::Value,
    ) -> Result<i64, DatabaseError>;

    /// Newest first, optionally restricted to one chat.
    async fn list_dead_letters(
        &self,
        chat_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, DatabaseError>;

    /// Remove every dead letter for one message. Returns rows removed.
    async fn delete_dead_letters(&self, key: MessageKey) -> Result<u64, DatabaseError>;

    /// Remove all dead letters. Returns rows removed.
    async fn clear_dead_letters(&self) -> Result<u64, DatabaseError>;

    async fn count_dead_letters(&self) -> Result<u64, DatabaseError>;

    // ── Statistics ──────────────────────────────────────────────────

    async fn statistics(&self) -> Result<LedgerStats, DatabaseError>;
}
