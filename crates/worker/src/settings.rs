//! Worker process settings.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use livequeue_engine::{ProcessorConfig, QueueConfig};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Postgres connection string; `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub processors: usize,
    /// Period of the stuck-job sweep.
    pub sweep_interval: Duration,
    /// `processing` jobs untouched for this many minutes are reset by the sweep.
    pub stuck_timeout_minutes: u32,
    /// Sample events enqueued at startup.
    pub demo_events: usize,
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let queue = QueueConfig::from_lookup(&lookup).context("invalid queue configuration")?;
        let processor =
            ProcessorConfig::from_lookup(&lookup).context("invalid processor configuration")?;

        let processors = parse_or(&lookup, "LIVEQUEUE_PROCESSORS", 1usize)?;
        if processors == 0 {
            bail!("LIVEQUEUE_PROCESSORS must be at least 1");
        }
        let sweep_secs = parse_or(&lookup, "LIVEQUEUE_SWEEP_INTERVAL_SECS", 60u64)?;
        if sweep_secs == 0 {
            bail!("LIVEQUEUE_SWEEP_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            processors,
            sweep_interval: Duration::from_secs(sweep_secs),
            stuck_timeout_minutes: parse_or(&lookup, "LIVEQUEUE_STUCK_TIMEOUT_MINUTES", 5u32)?,
            demo_events: parse_or(&lookup, "LIVEQUEUE_DEMO_EVENTS", 0usize)?,
            queue,
            processor,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value {raw:?} for {key}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_run_one_in_memory_processor() {
        let settings = WorkerSettings::from_lookup(lookup(&[])).unwrap();
        assert!(settings.database_url.is_none());
        assert_eq!(settings.processors, 1);
        assert_eq!(settings.sweep_interval, Duration::from_secs(60));
        assert_eq!(settings.stuck_timeout_minutes, 5);
        assert_eq!(settings.queue, QueueConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let settings = WorkerSettings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/livequeue"),
            ("LIVEQUEUE_PROCESSORS", "4"),
            ("LIVEQUEUE_MAX_QUEUE_SIZE", "250"),
            ("LIVEQUEUE_IDLE_TIMEOUT_MS", "750"),
        ]))
        .unwrap();
        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://localhost/livequeue")
        );
        assert_eq!(settings.processors, 4);
        assert_eq!(settings.queue.max_queue_size, 250);
        assert_eq!(settings.processor.idle_timeout, Duration::from_millis(750));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(WorkerSettings::from_lookup(lookup(&[("LIVEQUEUE_PROCESSORS", "0")])).is_err());
        assert!(WorkerSettings::from_lookup(lookup(&[("LIVEQUEUE_PROCESSORS", "many")])).is_err());
        assert!(
            WorkerSettings::from_lookup(lookup(&[("LIVEQUEUE_EVICTION_FRACTION", "2")])).is_err()
        );
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let settings = WorkerSettings::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(settings.database_url.is_none());
    }
}
