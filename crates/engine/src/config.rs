//! Queue and processor configuration.
//!
//! Both structs carry working defaults, deserialize from a host application's
//! config (missing fields fall back to defaults), and can be read from
//! `LIVEQUEUE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use livequeue_core::RetryPolicy;
use livequeue_core::job::DEFAULT_MAX_ATTEMPTS;

/// Invalid configuration value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{key} out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },
}

/// Admission, priority and health settings for a [`crate::QueueManager`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending + processing jobs allowed before admission starts evicting.
    pub max_queue_size: usize,
    /// Share of `max_queue_size` evicted to make room for a gift event.
    pub eviction_fraction: f64,
    /// Jobs at or above this priority are never evicted.
    pub gift_reservation_priority: i32,
    /// Non-gift events below this priority are rejected while full.
    pub min_priority_under_load: i32,
    /// Event types that get gift treatment (priority rules, eviction carve-out).
    pub gift_event_types: Vec<String>,
    /// Attempt ceiling when the producer does not set one.
    pub default_max_attempts: u32,
    /// Look-back window for the health success rate.
    pub health_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            eviction_fraction: 0.10,
            gift_reservation_priority: 100,
            min_priority_under_load: 50,
            gift_event_types: vec!["gift".to_string()],
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            health_window: Duration::from_secs(60 * 60),
        }
    }
}

impl QueueConfig {
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    pub fn with_eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = fraction;
        self
    }

    pub fn with_gift_event_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.gift_event_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = parse_var(&lookup, "LIVEQUEUE_MAX_QUEUE_SIZE")? {
            cfg.max_queue_size = v;
        }
        if let Some(v) = parse_var(&lookup, "LIVEQUEUE_EVICTION_FRACTION")? {
            cfg.eviction_fraction = v;
        }
        if let Some(v) = parse_var(&lookup, "LIVEQUEUE_GIFT_RESERVATION_PRIORITY")? {
            cfg.gift_reservation_priority = v;
        }
        if let Some(v) = parse_var(&lookup, "LIVEQUEUE_MIN_PRIORITY_UNDER_LOAD")? {
            cfg.min_priority_under_load = v;
        }
        if let Some(v) = parse_var(&lookup, "LIVEQUEUE_MAX_ATTEMPTS")? {
            cfg.default_max_attempts = v;
        }
        if let Some(raw) = lookup("LIVEQUEUE_GIFT_EVENT_TYPES") {
            cfg.gift_event_types = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LIVEQUEUE_HEALTH_WINDOW_MS")? {
            cfg.health_window = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::OutOfRange {
                key: "max_queue_size",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "eviction_fraction",
                reason: format!("{} is not in (0, 1]", self.eviction_fraction),
            });
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                key: "default_max_attempts",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Worker loop settings for a [`crate::JobProcessor`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Name for logging and claim ownership.
    pub name: String,
    /// Longest idle wait before polling again without a wake signal.
    pub idle_timeout: Duration,
    /// How long shutdown waits for the in-flight job.
    pub shutdown_timeout: Duration,
    /// On shutdown, own `processing` jobs older than this are reset.
    pub stuck_grace: Duration,
    /// Pause after the store fails before trying again.
    pub store_error_pause: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            name: "job-processor".to_string(),
            idle_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            stuck_grace: Duration::from_secs(5),
            store_error_pause: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_stuck_grace(mut self, grace: Duration) -> Self {
        self.stuck_grace = grace;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(name) = lookup("LIVEQUEUE_PROCESSOR_NAME") {
            cfg.name = name;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LIVEQUEUE_IDLE_TIMEOUT_MS")? {
            cfg.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LIVEQUEUE_SHUTDOWN_TIMEOUT_MS")? {
            cfg.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LIVEQUEUE_STUCK_GRACE_MS")? {
            cfg.stuck_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LIVEQUEUE_BASE_RETRY_DELAY_MS")? {
            cfg.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LIVEQUEUE_MAX_RETRY_DELAY_MS")? {
            cfg.retry.max_delay = Duration::from_millis(ms);
        }

        if cfg.idle_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "idle_timeout",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(cfg)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
