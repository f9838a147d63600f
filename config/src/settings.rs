//! Typed settings snapshot with service defaults.

use crate::LoadError;

/// Outbox publisher knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxSettings {
    /// Events claimed per publisher cycle.
    pub batch_size: usize,
    /// Publish attempts before a row goes terminal.
    pub max_retries: u32,
    /// First backoff delay in seconds; doubles per retry.
    pub initial_retry_delay_seconds: u64,
    /// Backoff ceiling in seconds.
    pub max_retry_delay_seconds: u64,
    /// Poll frequency of the publisher loop in seconds.
    pub poll_interval_seconds: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 5,
            initial_retry_delay_seconds: 5,
            max_retry_delay_seconds: 300,
            poll_interval_seconds: 5,
        }
    }
}

/// Full service configuration. `Settings::from_env` reads each field from an
/// upper-snake environment variable of the same name (`AGENT_QUEUE_SIZE`,
/// `OUTBOX_BATCH_SIZE`, ...), falling back to the defaults below.
#[derive(Clone, Debug)]
pub struct Settings {
    // Server
    pub host: String,
    pub port: u16,

    // SQLite store
    pub database_path: String,

    // OpenAI-compatible endpoint (chat + embeddings)
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub openai_model: String,
    pub openai_embedding_model: String,

    // Agent bus
    pub agent_max_concurrency: usize,
    pub agent_queue_size: usize,
    pub agent_task_timeout: u64,

    // Approvals
    pub approval_timeout: u64,
    pub approval_warning_before_timeout: u64,
    pub approval_max_retries: u32,

    // Context store
    pub context_max_vectors_per_agent: usize,
    pub context_search_limit: usize,
    pub context_prune_threshold: f64,

    // Streaming
    pub stream_heartbeat_interval: u64,
    pub stream_max_connections_per_user: usize,
    pub stream_event_buffer_size: usize,
    pub stream_event_ttl: u64,

    // Outbox publisher
    pub outbox: OutboxSettings,

    // Plan executor
    pub max_concurrent_tasks: usize,
    pub task_timeout: u64,

    // Rate limiting
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            database_path: "atelier.db".to_string(),
            openai_api_key: String::new(),
            openai_base_url: None,
            openai_model: "gpt-4.1".to_string(),
            openai_embedding_model: "text-embedding-3-small".to_string(),
            agent_max_concurrency: 3,
            agent_queue_size: 100,
            agent_task_timeout: 600,
            approval_timeout: 300,
            approval_warning_before_timeout: 60,
            approval_max_retries: 3,
            context_max_vectors_per_agent: 1_000_000,
            context_search_limit: 10,
            context_prune_threshold: 0.9,
            stream_heartbeat_interval: 30,
            stream_max_connections_per_user: 1000,
            stream_event_buffer_size: 100,
            stream_event_ttl: 300,
            outbox: OutboxSettings::default(),
            max_concurrent_tasks: 3,
            task_timeout: 300,
            rate_limit_per_minute: 100,
            rate_limit_burst: 20,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, LoadError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| LoadError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn string_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    /// Reads settings from the process environment, defaulting every missing
    /// key. A present-but-unparseable value is an error, not a silent default.
    pub fn from_env() -> Result<Self, LoadError> {
        let d = Settings::default();
        Ok(Self {
            host: string_var("HOST", &d.host),
            port: parse_var("PORT", d.port)?,
            database_path: string_var("DATABASE_PATH", &d.database_path),
            openai_api_key: string_var("OPENAI_API_KEY", ""),
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            openai_model: string_var("OPENAI_MODEL", &d.openai_model),
            openai_embedding_model: string_var(
                "OPENAI_EMBEDDING_MODEL",
                &d.openai_embedding_model,
            ),
            agent_max_concurrency: parse_var("AGENT_MAX_CONCURRENCY", d.agent_max_concurrency)?,
            agent_queue_size: parse_var("AGENT_QUEUE_SIZE", d.agent_queue_size)?,
            agent_task_timeout: parse_var("AGENT_TASK_TIMEOUT", d.agent_task_timeout)?,
            approval_timeout: parse_var("APPROVAL_TIMEOUT", d.approval_timeout)?,
            approval_warning_before_timeout: parse_var(
                "APPROVAL_WARNING_BEFORE_TIMEOUT",
                d.approval_warning_before_timeout,
            )?,
            approval_max_retries: parse_var("APPROVAL_MAX_RETRIES", d.approval_max_retries)?,
            context_max_vectors_per_agent: parse_var(
                "CONTEXT_MAX_VECTORS_PER_AGENT",
                d.context_max_vectors_per_agent,
            )?,
            context_search_limit: parse_var("CONTEXT_SEARCH_LIMIT", d.context_search_limit)?,
            context_prune_threshold: parse_var(
                "CONTEXT_PRUNE_THRESHOLD",
                d.context_prune_threshold,
            )?,
            stream_heartbeat_interval: parse_var(
                "STREAM_HEARTBEAT_INTERVAL",
                d.stream_heartbeat_interval,
            )?,
            stream_max_connections_per_user: parse_var(
                "STREAM_MAX_CONNECTIONS_PER_USER",
                d.stream_max_connections_per_user,
            )?,
            stream_event_buffer_size: parse_var(
                "STREAM_EVENT_BUFFER_SIZE",
                d.stream_event_buffer_size,
            )?,
            stream_event_ttl: parse_var("STREAM_EVENT_TTL", d.stream_event_ttl)?,
            outbox: OutboxSettings {
                batch_size: parse_var("OUTBOX_BATCH_SIZE", d.outbox.batch_size)?,
                max_retries: parse_var("OUTBOX_MAX_RETRIES", d.outbox.max_retries)?,
                initial_retry_delay_seconds: parse_var(
                    "OUTBOX_INITIAL_RETRY_DELAY_SECONDS",
                    d.outbox.initial_retry_delay_seconds,
                )?,
                max_retry_delay_seconds: parse_var(
                    "OUTBOX_MAX_RETRY_DELAY_SECONDS",
                    d.outbox.max_retry_delay_seconds,
                )?,
                poll_interval_seconds: parse_var(
                    "OUTBOX_POLL_INTERVAL_SECONDS",
                    d.outbox.poll_interval_seconds,
                )?,
            },
            max_concurrent_tasks: parse_var("MAX_CONCURRENT_TASKS", d.max_concurrent_tasks)?,
            task_timeout: parse_var("TASK_TIMEOUT", d.task_timeout)?,
            rate_limit_per_minute: parse_var("RATE_LIMIT_PER_MINUTE", d.rate_limit_per_minute)?,
            rate_limit_burst: parse_var("RATE_LIMIT_BURST", d.rate_limit_burst)?,
        })
    }
}
