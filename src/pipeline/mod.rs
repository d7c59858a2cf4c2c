//! Message processing pipeline.
//!
//! Every chat message flows through [`Orchestrator::handle`]:
//! 1. Input validation and sanitisation
//! 2. Per-identity rate limiting
//! 3. Idempotency ledger reservation
//! 4. Content filter
//! 5. Extraction and arbitration
//! 6. Calendar and task delivery
//! 7. Ledger record and confirmation

pub mod commands;
pub mod orchestrator;
pub mod types;

pub use commands::run_command;
pub use orchestrator::{Dependencies, Orchestrator, StatusReport};
pub use types::{Confirmation, HandleOutcome, IncomingMessage, ProcessedEvent};
