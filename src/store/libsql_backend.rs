//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, DeadLetter, DeliveryKind, DeliveryRecord, LedgerStats, MessageKey, ProcessedRecord,
};

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn count(&self, sql: &str, op: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let n: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
                Ok(n.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

const PROCESSED_COLUMNS: &str =
    "message_id, chat_id, user_id, message_text, processed_at, extraction_success, event_id, task_id";

const DELIVERY_COLUMNS: &str =
    "event_id, kind, title, source_message_id, source_chat_id, created_at, remote_id";

const DEAD_LETTER_COLUMNS: &str = "id, message_id, chat_id, message_text, error, created_at, metadata";

/// Column order matches PROCESSED_COLUMNS.
fn row_to_processed(row: &libsql::Row) -> Result<ProcessedRecord, libsql::Error> {
    let processed_at: String = row.get(4)?;
    let success: i64 = row.get(5)?;
    Ok(ProcessedRecord {
        key: MessageKey::new(row.get(0)?, row.get(1)?),
        user_id: row.get::<Option<i64>>(2)?,
        message_text: row.get(3)?,
        processed_at: parse_datetime(&processed_at),
        extraction_success: success != 0,
        event_id: row.get::<Option<String>>(6)?,
        task_id: row.get::<Option<String>>(7)?,
    })
}

/// Column order matches DELIVERY_COLUMNS.
fn row_to_delivery(row: &libsql::Row) -> Result<DeliveryRecord, libsql::Error> {
    let kind: String = row.get(1)?;
    let created_at: String = row.get(5)?;
    Ok(DeliveryRecord {
        event_id: row.get(0)?,
        kind: kind.parse().unwrap_or(DeliveryKind::Calendar),
        title: row.get(2)?,
        source: MessageKey::new(row.get(3)?, row.get(4)?),
        created_at: parse_datetime(&created_at),
        remote_id: row.get(6)?,
    })
}

/// Column order matches DEAD_LETTER_COLUMNS.
fn row_to_dead_letter(row: &libsql::Row) -> Result<DeadLetter, libsql::Error> {
    let created_at: String = row.get(5)?;
    let metadata: String = row.get(6)?;
    Ok(DeadLetter {
        id: row.get(0)?,
        key: MessageKey::new(row.get(1)?, row.get(2)?),
        message_text: row.get(3)?,
        error: row.get(4)?,
        created_at: parse_datetime(&created_at),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.count("SELECT 1", "ping").await.map(|_| ())
    }

    // ── Ledger ──────────────────────────────────────────────────────

    async fn get_processed(&self, key: MessageKey) -> Result<Option<ProcessedRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PROCESSED_COLUMNS} FROM processed_messages WHERE message_id = ?1 AND chat_id = ?2"
                ),
                params![key.message_id, key.chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_processed: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_processed(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_processed: {e}"))),
        }
    }

    async fn upsert_processed(&self, record: &ProcessedRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO processed_messages
                    (message_id, chat_id, user_id, message_text, processed_at,
                     extraction_success, event_id, task_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.key.message_id,
                    record.key.chat_id,
                    opt_int(record.user_id),
                    record.message_text.as_str(),
                    record.processed_at.to_rfc3339(),
                    record.extraction_success as i64,
                    opt_text(record.event_id.as_deref()),
                    opt_text(record.task_id.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_processed: {e}")))?;

        debug!(key = %record.key, success = record.extraction_success, "Ledger entry written");
        Ok(())
    }

    async fn recent_processed(
        &self,
        chat_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ProcessedRecord>, DatabaseError> {
        let mut rows = match chat_id {
            Some(chat) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {PROCESSED_COLUMNS} FROM processed_messages WHERE chat_id = ?1
                             ORDER BY processed_at DESC LIMIT ?2"
                        ),
                        params![chat, sql_limit(limit)],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {PROCESSED_COLUMNS} FROM processed_messages
                             ORDER BY processed_at DESC LIMIT ?1"
                        ),
                        params![sql_limit(limit)],
                    )
                    .await
            }
        }
        .map_err(|e| DatabaseError::Query(format!("recent_processed: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_processed: {e}")))?
        {
            records.push(
                row_to_processed(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(records)
    }

    // ── Deliveries ──────────────────────────────────────────────────

    async fn insert_delivery(&self, record: &DeliveryRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO deliveries ({DELIVERY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    record.event_id.as_str(),
                    record.kind.as_str(),
                    record.title.as_str(),
                    record.source.message_id,
                    record.source.chat_id,
                    record.created_at.to_rfc3339(),
                    record.remote_id.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_delivery: {e}")))?;

        debug!(event_id = %record.event_id, kind = %record.kind, "Delivery recorded");
        Ok(())
    }

    async fn deliveries_for(&self, key: MessageKey) -> Result<Vec<DeliveryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DELIVERY_COLUMNS} FROM deliveries
                     WHERE source_message_id = ?1 AND source_chat_id = ?2
                     ORDER BY created_at ASC"
                ),
                params![key.message_id, key.chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deliveries_for: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("deliveries_for: {e}")))?
        {
            records.push(
                row_to_delivery(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(records)
    }

    // ── Dead letters ────────────────────────────────────────────────

    async fn insert_dead_letter(
        &self,
        key: MessageKey,
        message_text: &str,
        error: &str,
        metadata: &serde_json::Value,
    ) -> Result<i64, DatabaseError> {
        let metadata = serde_json::to_string(metadata)
            .map_err(|e| DatabaseError::Serialization(format!("dead letter metadata: {e}")))?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO dead_letters (message_id, chat_id, message_text, error, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.message_id,
                key.chat_id,
                message_text,
                error,
                Utc::now().to_rfc3339(),
                metadata,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_dead_letter: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(id, key = %key, "Dead letter written");
        Ok(id)
    }

    async fn list_dead_letters(
        &self,
        chat_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, DatabaseError> {
        let mut rows = match chat_id {
            Some(chat) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE chat_id = ?1
                             ORDER BY id DESC LIMIT ?2"
                        ),
                        params![chat, sql_limit(limit)],
                    )
                    .await
            }
            None => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters ORDER BY id DESC LIMIT ?1"
                        ),
                        params![sql_limit(limit)],
                    )
                    .await
            }
        }
        .map_err(|e| DatabaseError::Query(format!("list_dead_letters: {e}")))?;

        let mut letters = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_dead_letters: {e}")))?
        {
            letters.push(
                row_to_dead_letter(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(letters)
    }

    async fn delete_dead_letters(&self, key: MessageKey) -> Result<u64, DatabaseError> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM dead_letters WHERE message_id = ?1 AND chat_id = ?2",
                params![key.message_id, key.chat_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_dead_letters: {e}")))?;
        Ok(removed)
    }

    async fn clear_dead_letters(&self) -> Result<u64, DatabaseError> {
        let removed = self
            .conn()
            .execute("DELETE FROM dead_letters", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_dead_letters: {e}")))?;
        info!(removed, "Dead-letter queue cleared");
        Ok(removed)
    }

    async fn count_dead_letters(&self) -> Result<u64, DatabaseError> {
        self.count("SELECT COUNT(*) FROM dead_letters", "count_dead_letters")
            .await
    }

    // ── Statistics ──────────────────────────────────────────────────

    async fn statistics(&self) -> Result<LedgerStats, DatabaseError> {
        let total_messages = self
            .count("SELECT COUNT(*) FROM processed_messages", "statistics")
            .await?;
        let successful_extractions = self
            .count(
                "SELECT COUNT(*) FROM processed_messages WHERE extraction_success = 1",
                "statistics",
            )
            .await?;
        let total_deliveries = self.count("SELECT COUNT(*) FROM deliveries", "statistics").await?;
        let dead_letters = self.count_dead_letters().await?;

        let mut deliveries_by_kind = BTreeMap::new();
        let mut rows = self
            .conn()
            .query("SELECT kind, COUNT(*) FROM deliveries GROUP BY kind", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?
        {
            let kind: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?;
            let n: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?;
            deliveries_by_kind.insert(kind, n.max(0) as u64);
        }

        let mut messages_by_chat = BTreeMap::new();
        let mut rows = self
            .conn()
            .query(
                "SELECT chat_id, COUNT(*) FROM processed_messages GROUP BY chat_id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?
        {
            let chat: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?;
            let n: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("statistics: {e}")))?;
            messages_by_chat.insert(chat, n.max(0) as u64);
        }

        Ok(LedgerStats {
            total_messages,
            successful_extractions,
            total_deliveries,
            deliveries_by_kind,
            messages_by_chat,
            dead_letters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn record(message_id: i64, chat_id: i64, success: bool) -> ProcessedRecord {
        ProcessedRecord {
            key: MessageKey::new(message_id, chat_id),
            user_id: Some(7),
            message_text: "Math assignment due Friday".into(),
            processed_at: Utc::now(),
            extraction_success: success,
            event_id: success.then(|| "evt-1".to_string()),
            task_id: None,
        }
    }

    fn delivery(kind: DeliveryKind, key: MessageKey) -> DeliveryRecord {
        DeliveryRecord {
            event_id: Uuid::new_v4().to_string(),
            kind,
            title: "Math assignment".into(),
            source: key,
            created_at: Utc::now(),
            remote_id: "remote-1".into(),
        }
    }

    // ── Ledger tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn processed_round_trip() {
        let db = test_db().await;
        let key = MessageKey::new(1, 100);
        assert!(!db.is_processed(key).await.unwrap());

        db.upsert_processed(&record(1, 100, true)).await.unwrap();

        let fetched = db.get_processed(key).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, Some(7));
        assert!(fetched.extraction_success);
        assert_eq!(fetched.event_id.as_deref(), Some("evt-1"));
        assert!(db.is_processed(key).await.unwrap());
    }

    #[tokio::test]
    async fn same_key_is_replaced_not_duplicated() {
        let db = test_db().await;
        db.upsert_processed(&record(1, 100, false)).await.unwrap();
        db.upsert_processed(&record(1, 100, true)).await.unwrap();

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.successful_extractions, 1);
    }

    #[tokio::test]
    async fn key_is_composite() {
        let db = test_db().await;
        db.upsert_processed(&record(1, 100, false)).await.unwrap();
        assert!(!db.is_processed(MessageKey::new(1, 200)).await.unwrap());
        assert!(!db.is_processed(MessageKey::new(2, 100)).await.unwrap());
    }

    #[tokio::test]
    async fn recent_processed_filters_by_chat() {
        let db = test_db().await;
        db.upsert_processed(&record(1, 100, false)).await.unwrap();
        db.upsert_processed(&record(2, 100, false)).await.unwrap();
        db.upsert_processed(&record(3, 200, false)).await.unwrap();

        assert_eq!(db.recent_processed(Some(100), 10).await.unwrap().len(), 2);
        assert_eq!(db.recent_processed(None, 10).await.unwrap().len(), 3);
        assert_eq!(db.recent_processed(None, 1).await.unwrap().len(), 1);
    }

    // ── Delivery tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn deliveries_are_listed_per_message() {
        let db = test_db().await;
        let key = MessageKey::new(5, 100);
        db.insert_delivery(&delivery(DeliveryKind::Calendar, key)).await.unwrap();
        db.insert_delivery(&delivery(DeliveryKind::Task, key)).await.unwrap();
        db.insert_delivery(&delivery(DeliveryKind::Task, MessageKey::new(6, 100)))
            .await
            .unwrap();

        let for_key = db.deliveries_for(key).await.unwrap();
        assert_eq!(for_key.len(), 2);

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.total_deliveries, 3);
        assert_eq!(stats.deliveries_by_kind.get("task"), Some(&2));
        assert_eq!(stats.deliveries_by_kind.get("calendar"), Some(&1));
    }

    // ── Dead-letter tests ───────────────────────────────────────────

    #[tokio::test]
    async fn dead_letters_append_list_and_clear() {
        let db = test_db().await;
        let meta = json!({"operation": "create_calendar_event", "title": "Quiz", "attempts": 3});
        db.insert_dead_letter(MessageKey::new(1, 100), "quiz friday", "HTTP 503", &meta)
            .await
            .unwrap();
        db.insert_dead_letter(MessageKey::new(1, 100), "quiz friday", "circuit open", &meta)
            .await
            .unwrap();
        db.insert_dead_letter(MessageKey::new(2, 200), "lab monday", "timeout", &meta)
            .await
            .unwrap();

        let chat_100 = db.list_dead_letters(Some(100), 10).await.unwrap();
        assert_eq!(chat_100.len(), 2);
        assert_eq!(chat_100[0].error, "circuit open");
        assert_eq!(chat_100[0].metadata["operation"], "create_calendar_event");

        assert_eq!(db.delete_dead_letters(MessageKey::new(1, 100)).await.unwrap(), 2);
        assert_eq!(db.count_dead_letters().await.unwrap(), 1);
        assert_eq!(db.clear_dead_letters().await.unwrap(), 1);
        assert_eq!(db.count_dead_letters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn statistics_group_by_chat() {
        let db = test_db().await;
        db.upsert_processed(&record(1, 100, true)).await.unwrap();
        db.upsert_processed(&record(2, 100, false)).await.unwrap();
        db.upsert_processed(&record(3, 200, false)).await.unwrap();

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.messages_by_chat.get(&100), Some(&2));
        assert_eq!(stats.messages_by_chat.get(&200), Some(&1));
    }

    #[tokio::test]
    async fn local_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scribe.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.upsert_processed(&record(9, 1, true)).await.unwrap();
        }
        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(reopened.is_processed(MessageKey::new(9, 1)).await.unwrap());
        reopened.ping().await.unwrap();
    }
}
