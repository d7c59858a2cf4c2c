//! Configuration types.
//!
//! Built once at startup with [`Config::from_env`] and handed to each
//! component's constructor. Every section has a `Default` matching the
//! production defaults, which is what tests use.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Default IANA timezone for timed calendar events.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Whole-application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub filter: FilterConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub llm: LlmSettings,
    pub google: GoogleConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Build configuration from environment variables.
    ///
    /// Unset variables fall back to defaults; set-but-unparseable values are
    /// an error rather than being silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let filter = FilterConfig {
            min_length: env_parse("CLASS_SCRIBE_MIN_LENGTH", defaults.filter.min_length)?,
            max_message_length: env_parse(
                "CLASS_SCRIBE_MAX_MESSAGE_LENGTH",
                defaults.filter.max_message_length,
            )?,
        };

        let rate_limit = RateLimitConfig {
            per_minute: env_parse("CLASS_SCRIBE_RATE_PER_MINUTE", defaults.rate_limit.per_minute)?,
            per_hour: env_parse("CLASS_SCRIBE_RATE_PER_HOUR", defaults.rate_limit.per_hour)?,
            per_day: env_parse("CLASS_SCRIBE_RATE_PER_DAY", defaults.rate_limit.per_day)?,
        };

        let breaker = BreakerConfig {
            failure_threshold: env_parse(
                "CLASS_SCRIBE_BREAKER_THRESHOLD",
                defaults.breaker.failure_threshold,
            )?,
            recovery_timeout: Duration::from_secs(env_parse(
                "CLASS_SCRIBE_BREAKER_RECOVERY_SECS",
                defaults.breaker.recovery_timeout.as_secs(),
            )?),
        };

        let retry = RetryConfig {
            max_attempts: env_parse("CLASS_SCRIBE_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
            ..defaults.retry
        };

        let backend = match std::env::var("CLASS_SCRIBE_LLM_BACKEND") {
            Ok(raw) => raw.parse::<LlmBackend>().map_err(|message| ConfigError::InvalidValue {
                key: "CLASS_SCRIBE_LLM_BACKEND".into(),
                message,
            })?,
            Err(_) => LlmBackend::Anthropic,
        };
        let api_key = match backend {
            LlmBackend::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
            LlmBackend::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
        }
        .filter(|k| !k.trim().is_empty())
        .map(SecretString::from);

        let llm = LlmSettings {
            enabled: env_parse("CLASS_SCRIBE_ENABLE_LLM", defaults.llm.enabled)?,
            backend,
            api_key,
            model: std::env::var("CLASS_SCRIBE_MODEL")
                .unwrap_or_else(|_| backend.default_model().to_string()),
            cache_ttl: Duration::from_secs(env_parse(
                "CLASS_SCRIBE_LLM_CACHE_SECS",
                defaults.llm.cache_ttl.as_secs(),
            )?),
        };

        let google = GoogleConfig {
            access_token: std::env::var("GOOGLE_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(SecretString::from),
            calendar_id: std::env::var("CLASS_SCRIBE_CALENDAR_ID")
                .unwrap_or(defaults.google.calendar_id),
            task_list_id: std::env::var("CLASS_SCRIBE_TASK_LIST_ID")
                .unwrap_or(defaults.google.task_list_id),
            timezone: std::env::var("CLASS_SCRIBE_TIMEZONE").unwrap_or(defaults.google.timezone),
            request_timeout: Duration::from_secs(env_parse(
                "CLASS_SCRIBE_HTTP_TIMEOUT_SECS",
                defaults.google.request_timeout.as_secs(),
            )?),
        };

        let storage = StorageConfig {
            db_path: std::env::var("CLASS_SCRIBE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.db_path),
        };

        let logging = LoggingConfig {
            filter: std::env::var("RUST_LOG").unwrap_or(defaults.logging.filter),
            log_dir: std::env::var("CLASS_SCRIBE_LOG_DIR").ok().map(PathBuf::from),
        };

        Ok(Self {
            filter,
            rate_limit,
            breaker,
            retry,
            llm,
            google,
            storage,
            logging,
        })
    }
}

/// Read and parse an env var, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Content filter and input limits.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Messages shorter than this (after trimming) are never processed.
    pub min_length: usize,
    /// Longer messages are rejected by the input validator.
    pub max_message_length: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_length: 10,
            max_message_length: 4096,
        }
    }
}

/// Per-identity sliding-window limits.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_minute: usize,
    pub per_hour: usize,
    pub per_day: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_hour: 100,
            per_day: 500,
        }
    }
}

/// Circuit breaker settings, shared by both delivery pipelines.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Retry-with-backoff settings for downstream create calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

/// Language-model extraction settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub enabled: bool,
    pub backend: LlmBackend,
    /// No key means the probabilistic extractor is disabled.
    pub api_key: Option<SecretString>,
    pub model: String,
    /// How long extraction results are memoised per message text.
    pub cache_ttl: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: LlmBackend::Anthropic,
            api_key: None,
            model: LlmBackend::Anthropic.default_model().to_string(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Google Calendar / Tasks settings.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth access token. Refreshing it is the deployer's concern.
    pub access_token: Option<SecretString>,
    pub calendar_id: String,
    pub task_list_id: String,
    /// IANA timezone attached to timed calendar events.
    pub timezone: String,
    pub request_timeout: Duration,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            calendar_id: "primary".to_string(),
            task_list_id: "@default".to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Durable storage location.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/class-scribe.db"),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive.
    pub filter: String,
    /// When set, logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            log_dir: None,
        }
    }
}
