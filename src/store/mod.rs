//! Persistence layer: libSQL-backed ledger, delivery log and dead letters.

pub mod ledger;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use ledger::{IdempotencyLedger, InFlightGuard};
pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, DeadLetter, DeliveryKind, DeliveryRecord, LedgerStats, MessageKey, ProcessedRecord,
};
