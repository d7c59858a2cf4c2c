//! Idempotency ledger: at most one processing run per message.
//!
//! The durable record answers "was this message handled before?" across
//! restarts. The in-flight set answers the same question for flows that are
//! running right now in this process, so a redelivered message that arrives
//! while the first copy is still being extracted is turned away as well.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::traits::{Database, MessageKey, ProcessedRecord};

type InFlight = Arc<Mutex<HashSet<MessageKey>>>;

/// Ledger over the durable store plus a process-local reservation set.
#[derive(Clone)]
pub struct IdempotencyLedger {
    db: Arc<dyn Database>,
    in_flight: InFlight,
}

impl IdempotencyLedger {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn has_processed(&self, key: MessageKey) -> Result<bool, DatabaseError> {
        self.db.is_processed(key).await
    }

    /// Reserve `key` for one processing run.
    ///
    /// Returns `None` if the key is already recorded or another flow holds
    /// it. The reservation is taken before the durable lookup and released
    /// if the lookup finds a record, so two concurrent callers can never
    /// both get a guard.
    pub async fn begin(&self, key: MessageKey) -> Result<Option<InFlightGuard>, DatabaseError> {
        if !lock(&self.in_flight).insert(key) {
            debug!(key = %key, "Message already in flight");
            return Ok(None);
        }
        let guard = InFlightGuard {
            key,
            in_flight: Arc::clone(&self.in_flight),
        };

        // Guard drops on both early returns, freeing the key.
        if self.db.is_processed(key).await? {
            debug!(key = %key, "Message already processed");
            return Ok(None);
        }
        Ok(Some(guard))
    }

    /// Write (or overwrite) the ledger row for `key`.
    pub async fn record(
        &self,
        key: MessageKey,
        user_id: Option<i64>,
        message_text: &str,
        extraction_success: bool,
        event_id: Option<String>,
        task_id: Option<String>,
    ) -> Result<(), DatabaseError> {
        let record = ProcessedRecord {
            key,
            user_id,
            message_text: message_text.to_string(),
            processed_at: Utc::now(),
            extraction_success,
            event_id,
            task_id,
        };
        self.db.upsert_processed(&record).await
    }

    /// Number of keys currently reserved.
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

/// Reservation of one key. Dropping it frees the key.
#[derive(Debug)]
pub struct InFlightGuard {
    key: MessageKey,
    in_flight: InFlight,
}

impl InFlightGuard {
    pub fn key(&self) -> MessageKey {
        self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

fn lock(set: &InFlight) -> std::sync::MutexGuard<'_, HashSet<MessageKey>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}
