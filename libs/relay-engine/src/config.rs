use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// Root configuration, parsed from TOML.
///
/// Safety-relevant values (retry budget, batching, leases, rate limit, record
/// TTL, absent policy) are required and have no defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// HTTP API port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    pub pipe: PipeConfig,

    pub enrichment: EnrichmentConfig,

    pub target: TargetConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    /// Which inbound events are accepted into the buffer.
    #[serde(default)]
    pub rule: RuleConfig,
}

fn default_api_port() -> u16 {
    9300
}

/// What to do when no live enrichment record exists for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentPolicy {
    /// Count the attempt as a retryable failure; the record may not be written yet.
    Retry,
    /// Dispatch with empty attributes.
    DispatchEmpty,
    /// Dead-letter immediately.
    DeadLetter,
}

/// What to do when the target rejects an event with a client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentFailurePolicy {
    /// Retry under the shared budget, like any other failure.
    #[default]
    Retry,
    /// Dead-letter on the first permanent failure.
    DeadLetter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipeConfig {
    /// Number of independent batch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Retries allowed after the first attempt.
    pub max_retry_count: u32,
    /// Maximum messages per received batch.
    pub source_batch_size: usize,
    /// How long a receive waits to fill a batch.
    pub source_maximum_batching_window_ms: u64,
    /// Lease length; must exceed the per-message processing time.
    pub visibility_timeout_ms: u64,
    /// Total retry budget measured from the first receipt.
    pub retry_period_ms: u64,
    /// Backoff base: delay = base × 2^(receive_count − 1).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    pub absent_policy: AbsentPolicy,
    #[serde(default)]
    pub permanent_failure_policy: PermanentFailurePolicy,
}

fn default_workers() -> usize {
    1
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}

impl PipeConfig {
    pub fn batching_window(&self) -> Duration {
        Duration::from_millis(self.source_maximum_batching_window_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// TTL applied to record writes.
    pub record_ttl_secs: u64,
    /// Dot path of the correlation id inside the event payload.
    #[serde(default = "default_correlation_field")]
    pub correlation_field: String,
    /// Attributes copied into the enriched event. Empty = all.
    #[serde(default)]
    pub fields: Vec<String>,
    /// How often expired records are physically purged.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_correlation_field() -> String {
    "id".into()
}
fn default_purge_interval_secs() -> u64 {
    60
}

impl EnrichmentConfig {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Endpoint URL; `*` is replaced by the correlation id.
    pub endpoint_url: String,
    /// Maximum outbound calls in any one-second window.
    pub rate_limit_per_second: u32,
    #[serde(default = "default_target_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_target_timeout_ms() -> u64 {
    10_000
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeadLetterConfig {
    /// JSONL file for dead-letter entries. In-memory sink when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleConfig {
    /// Wildcard patterns on the event type.
    #[serde(default = "wildcard")]
    pub event_types: Vec<String>,
    /// Wildcard patterns on the event source.
    #[serde(default = "wildcard")]
    pub sources: Vec<String>,
}

fn wildcard() -> Vec<String> {
    vec!["*".into()]
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            event_types: wildcard(),
            sources: wildcard(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Messages that can hold a lease at the same time.
    fn in_flight(&self) -> u64 {
        (self.pipe.workers as u64).saturating_mul(self.pipe.source_batch_size as u64)
    }

    /// Longest rate-limiter wait for one in-flight message, in whole seconds.
    /// Assumes the preceding window is already full.
    fn rate_limit_wait_secs(&self) -> u64 {
        self.in_flight().div_ceil(u64::from(self.target.rate_limit_per_second.max(1)))
    }

    /// A lease must outlast the worst rate-limiter wait plus one target call,
    /// or messages are redelivered while still queued for the limiter.
    fn lease_floor_ms(&self) -> u64 {
        self.rate_limit_wait_secs()
            .saturating_mul(1_000)
            .saturating_add(self.target.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let pipe = &self.pipe;
        if pipe.workers == 0 {
            return Err(EngineError::Config("pipe.workers must be >= 1".into()));
        }
        if pipe.source_batch_size == 0 {
            return Err(EngineError::Config("pipe.source_batch_size must be >= 1".into()));
        }
        if pipe.visibility_timeout_ms == 0 {
            return Err(EngineError::Config("pipe.visibility_timeout_ms must be > 0".into()));
        }
        if pipe.retry_period_ms == 0 {
            return Err(EngineError::Config("pipe.retry_period_ms must be > 0".into()));
        }
        if pipe.visibility_timeout_ms <= self.target.timeout_ms {
            return Err(EngineError::Config(format!(
                "pipe.visibility_timeout_ms ({}) must exceed target.timeout_ms ({})",
                pipe.visibility_timeout_ms, self.target.timeout_ms
            )));
        }
        if self.target.rate_limit_per_second > 0 {
            let lease_floor = self.lease_floor_ms();
            if pipe.visibility_timeout_ms <= lease_floor {
                return Err(EngineError::Config(format!(
                    "pipe.visibility_timeout_ms ({}) must exceed {lease_floor}: {} in-flight messages \
                     at {}/s may wait {}s for the rate limiter before a {}ms target call",
                    pipe.visibility_timeout_ms,
                    self.in_flight(),
                    self.target.rate_limit_per_second,
                    self.rate_limit_wait_secs(),
                    self.target.timeout_ms
                )));
            }
        }
        if self.enrichment.record_ttl_secs == 0 {
            return Err(EngineError::Config("enrichment.record_ttl_secs must be > 0".into()));
        }
        if self.enrichment.correlation_field.is_empty() {
            return Err(EngineError::Config("enrichment.correlation_field must not be empty".into()));
        }
        if self.target.rate_limit_per_second == 0 {
            return Err(EngineError::Config("target.rate_limit_per_second must be >= 1".into()));
        }
        if self.target.endpoint_url.is_empty() {
            return Err(EngineError::Config("target.endpoint_url must not be empty".into()));
        }
        if self.target.username.is_some() != self.target.password.is_some() {
            return Err(EngineError::Config(
                "target.username and target.password must be set together".into(),
            ));
        }
        Ok(())
    }
}
