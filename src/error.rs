//! Error types for class-scribe.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel (chat transport) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Language-model provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors talking to a downstream calendar or task service.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Connection to {service} failed: {reason}")]
    Connection { service: String, reason: String },

    #[error("{service} timed out after {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{service} rejected the request: {reason}")]
    Validation { service: String, reason: String },

    #[error("Malformed response from {service}: {reason}")]
    MalformedResponse { service: String, reason: String },

    #[error("Circuit breaker for {service} is open")]
    CircuitOpen { service: String },
}

impl DeliveryError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Connectivity problems, timeouts, and HTTP status errors are transient.
    /// 400 and 422 mean the request body itself is bad and are treated as
    /// validation failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => !matches!(status, 400 | 422),
            Self::Validation { .. } | Self::MalformedResponse { .. } | Self::CircuitOpen { .. } => {
                false
            }
        }
    }
}

/// Input validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Message is empty")]
    Empty,

    #[error("Message too long: {length} > {max}")]
    TooLong { length: usize, max: usize },

    #[error("Potentially dangerous content detected: {pattern}")]
    BlockedContent { pattern: String },

    #[error("Message is mostly control characters ({count} of {length})")]
    ControlCharacters { count: usize, length: usize },
}

/// Errors that abort processing of a single message.
///
/// Only ledger failures surface here: idempotency depends on the ledger
/// being durable, so the transport has to decide whether to redeliver.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
