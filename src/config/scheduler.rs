//! Scheduler configuration structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{Backoff, RetryPolicy};

/// Bus topic names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// TIME notifications.
    pub time: String,
    /// PARTITION notifications.
    pub data: String,
    /// Program status notifications from state writers.
    pub program_status: String,
    /// Program status notifications forwarded to the scheduler.
    pub program_status_trigger: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            time: "timeevent".into(),
            data: "dataevent".into(),
            program_status: "programstatusevent".into(),
            program_status_trigger: "programstatustrigger".into(),
        }
    }
}

impl TopicConfig {
    /// Validate topic names.
    pub fn validate(&self) -> Result<(), String> {
        let topics = [
            &self.time,
            &self.data,
            &self.program_status,
            &self.program_status_trigger,
        ];
        if topics.iter().any(|t| t.is_empty()) {
            return Err("topic names must not be empty".into());
        }
        if self.program_status == self.program_status_trigger {
            return Err("program_status and program_status_trigger must differ".into());
        }
        Ok(())
    }
}

/// Subscriber loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Messages fetched per batch.
    pub batch_size: usize,
    /// Sleep after an empty fetch.
    pub poll_interval_ms: u64,
    /// Sleep after a failed batch.
    pub error_backoff_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 100,
            error_backoff_ms: 500,
        }
    }
}

impl SubscriberConfig {
    /// Validate subscriber settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Retry budget for a persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum executions, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay_ms: u64,
    /// Delay growth.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 100,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryConfig {
    /// Validate retry settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        Ok(())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self::with_backoff(cfg.max_attempts, Duration::from_millis(cfg.delay_ms), cfg.backoff)
    }
}

/// Durable store backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StoreBackendConfig {
    /// In-memory log, lost on exit.
    #[default]
    InMemory,
    /// JSONL commit log in a directory.
    File {
        /// Directory holding the log.
        path: PathBuf,
    },
}

/// Notification bus backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BusBackendConfig {
    /// In-memory topics.
    #[default]
    InMemory,
    /// One JSONL file per topic.
    File {
        /// Directory holding the topics.
        path: PathBuf,
    },
}

/// Time event publisher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeEventConfig {
    /// Whether to run the publisher.
    pub enabled: bool,
    /// Pass interval.
    pub interval_ms: u64,
    /// Fire times published per schedule and pass.
    pub max_fires_per_pass: usize,
}

impl Default for TimeEventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            max_fires_per_pass: 10,
        }
    }
}

impl TimeEventConfig {
    /// Validate publisher settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("time_events.interval_ms must be greater than 0".into());
        }
        if self.max_fires_per_pass == 0 {
            return Err("time_events.max_fires_per_pass must be greater than 0".into());
        }
        Ok(())
    }
}

/// Constraint re-check loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintCheckConfig {
    /// Whether to run the loop.
    pub enabled: bool,
    /// Pass interval.
    pub interval_ms: u64,
}

impl Default for ConstraintCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
        }
    }
}

impl ConstraintCheckConfig {
    /// Validate loop settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("constraint_check.interval_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Outbox relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Fallback poll interval when no commit signal arrives.
    pub interval_ms: u64,
    /// Entries relayed per pass.
    pub batch_size: usize,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            batch_size: 100,
        }
    }
}

impl OutboxConfig {
    /// Validate relay settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 || self.batch_size == 0 {
            return Err("outbox interval_ms and batch_size must be greater than 0".into());
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
    /// Print the module target of each event.
    pub with_target: bool,
    /// Colour the output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: crate::util::DEFAULT_LOG_FILTER.into(),
            with_target: true,
            ansi: false,
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consumer name under which subscriber offsets are stored.
    pub consumer_name: String,
    /// Topic names.
    pub topics: TopicConfig,
    /// Subscriber loop tuning.
    pub subscriber: SubscriberConfig,
    /// Retry budget of administrative transactions.
    pub admin_retry: RetryConfig,
    /// Retry budget of state writers.
    pub writer_retry: RetryConfig,
    /// Store backend.
    pub store: StoreBackendConfig,
    /// Bus backend.
    pub bus: BusBackendConfig,
    /// Time event publisher.
    pub time_events: TimeEventConfig,
    /// Constraint re-check loop.
    pub constraint_check: ConstraintCheckConfig,
    /// Outbox relay.
    pub outbox: OutboxConfig,
    /// Launch ids remembered for duplicate detection.
    pub launch_dedupe_capacity: usize,
    /// Log output.
    pub logging: LoggingConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            consumer_name: "scheduler".into(),
            topics: TopicConfig::default(),
            subscriber: SubscriberConfig::default(),
            admin_retry: RetryConfig::default(),
            writer_retry: RetryConfig::default(),
            store: StoreBackendConfig::default(),
            bus: BusBackendConfig::default(),
            time_events: TimeEventConfig::default(),
            constraint_check: ConstraintCheckConfig::default(),
            outbox: OutboxConfig::default(),
            launch_dedupe_capacity: 10_000,
            logging: LoggingConfig::default(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|v| v.parse::<T>().map_err(|e| format!("{name} is invalid: {e}")))
        .transpose()
}

impl SchedulerConfig {
    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.consumer_name.is_empty() {
            return Err("consumer_name must not be empty".into());
        }
        if self.launch_dedupe_capacity == 0 {
            return Err("launch_dedupe_capacity must be greater than 0".into());
        }
        self.topics.validate().map_err(|e| format!("topics invalid: {e}"))?;
        self.subscriber
            .validate()
            .map_err(|e| format!("subscriber invalid: {e}"))?;
        self.admin_retry
            .validate()
            .map_err(|e| format!("admin_retry invalid: {e}"))?;
        self.writer_retry
            .validate()
            .map_err(|e| format!("writer_retry invalid: {e}"))?;
        self.time_events.validate()?;
        self.constraint_check.validate()?;
        self.outbox.validate()?;
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, reading `.env` if present.
    ///
    /// `PROMETHEUS_SCHEDULER_CONFIG` names a JSON file used as the base; the other
    /// `PROMETHEUS_SCHEDULER_*` variables override single fields.
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(format!("failed to load .env: {e}"));
            }
        }
        let mut cfg = match env_string("PROMETHEUS_SCHEDULER_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| format!("failed to read {path}: {e}"))?;
                serde_json::from_str(&raw).map_err(|e| format!("parse error in {path}: {e}"))?
            }
            None => Self::default(),
        };
        if let Some(name) = env_string("PROMETHEUS_SCHEDULER_CONSUMER") {
            cfg.consumer_name = name;
        }
        if let Some(path) = env_string("PROMETHEUS_SCHEDULER_STORE_PATH") {
            cfg.store = StoreBackendConfig::File { path: path.into() };
        }
        if let Some(path) = env_string("PROMETHEUS_SCHEDULER_BUS_PATH") {
            cfg.bus = BusBackendConfig::File { path: path.into() };
        }
        if let Some(size) = env_parse("PROMETHEUS_SCHEDULER_BATCH_SIZE")? {
            cfg.subscriber.batch_size = size;
        }
        if let Some(interval) = env_parse("PROMETHEUS_SCHEDULER_POLL_INTERVAL_MS")? {
            cfg.subscriber.poll_interval_ms = interval;
        }
        if let Some(enabled) = env_parse("PROMETHEUS_SCHEDULER_TIME_EVENTS")? {
            cfg.time_events.enabled = enabled;
        }
        if let Some(filter) = env_string("PROMETHEUS_SCHEDULER_LOG") {
            cfg.logging.filter = filter;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
