//! Queue manager: the producer, consumer and operator facing API.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use livequeue_core::{Job, JobId, JobStatus, NewJob, ProcessingLog, StatusCounts};

use crate::admission::{Admission, AdmissionController};
use crate::config::{ProcessorConfig, QueueConfig};
use crate::dispatch::{ActiveService, HandlerResult, ServiceSlot};
use crate::error::QueueError;
use crate::notify::Notifier;
use crate::priority::{
    GiftEventTypes, GiftOverridesSpec, PriorityProfileSpec, PriorityResolver, PriorityTable,
    ServicePriorityProfile,
};
use crate::processor::{JobProcessor, ProcessorHandle};
use crate::store::JobStore;

/// Per-call enqueue options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Resolve priority against this consumer instead of the active one.
    pub consumer_id: Option<String>,
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn for_consumer(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: Some(consumer_id.into()),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Pending + processing.
    pub current_size: usize,
    pub max_size: usize,
    pub utilization_percent: f64,
    pub per_status: StatusCounts,
    /// Pending + processing jobs per event type.
    pub per_event_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Warning => "warning",
            HealthLevel::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: HealthLevel,
    pub issues: Vec<String>,
    pub utilization_percent: f64,
    /// Success + skip share of log records in the health window.
    pub success_rate: f64,
}

const UTILIZATION_WARNING: f64 = 90.0;
const UTILIZATION_CRITICAL: f64 = 95.0;
const SUCCESS_RATE_WARNING: f64 = 95.0;
const SUCCESS_RATE_CRITICAL: f64 = 90.0;

fn assess_health(utilization: f64, success_rate: f64) -> (HealthLevel, Vec<String>) {
    let mut level = HealthLevel::Healthy;
    let mut issues = Vec::new();

    if utilization > UTILIZATION_CRITICAL {
        level = HealthLevel::Critical;
        issues.push(format!("queue utilization critical: {utilization:.1}%"));
    } else if utilization > UTILIZATION_WARNING {
        level = HealthLevel::Warning;
        issues.push(format!("queue utilization high: {utilization:.1}%"));
    }

    if success_rate < SUCCESS_RATE_CRITICAL {
        level = HealthLevel::Critical;
        issues.push(format!("success rate critical: {success_rate:.1}%"));
    } else if success_rate < SUCCESS_RATE_WARNING {
        level = level.max(HealthLevel::Warning);
        issues.push(format!("success rate low: {success_rate:.1}%"));
    }

    (level, issues)
}

/// Composes priority resolution, admission and the store.
///
/// Shared by reference (or `Arc`) between producers and operators; all
/// methods take `&self`.
pub struct QueueManager<S: JobStore + ?Sized + 'static> {
    store: Arc<S>,
    config: QueueConfig,
    resolver: PriorityResolver,
    admission: AdmissionController,
    service: Arc<ServiceSlot>,
    notifiers: Mutex<Vec<Weak<Notifier>>>,
    /// Serializes admission + insert so two producers cannot both take the
    /// last free slot. Covers this manager only: managers in other processes
    /// sharing the same Postgres store admit independently and can briefly
    /// push the active count past `max_queue_size`.
    enqueue_lock: Mutex<()>,
    processor_seq: AtomicUsize,
}

impl<S: JobStore + ?Sized + 'static> QueueManager<S> {
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self::with_priority_table(store, config, PriorityTable::default())
    }

    pub fn with_priority_table(store: Arc<S>, config: QueueConfig, table: PriorityTable) -> Self {
        let resolver =
            PriorityResolver::new(table, GiftEventTypes::new(config.gift_event_types.clone()));
        let admission = AdmissionController::new(&config);
        Self {
            store,
            config,
            resolver,
            admission,
            service: Arc::new(ServiceSlot::default()),
            notifiers: Mutex::new(Vec::new()),
            enqueue_lock: Mutex::new(()),
            processor_seq: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PriorityResolver {
        &self.resolver
    }

    pub fn active_service(&self) -> Arc<ActiveService> {
        self.service.current()
    }

    // ---- producer API ----

    /// Resolve priority, pass admission, insert and wake a processor.
    ///
    /// Fails synchronously only with [`QueueError::QueueFull`] or a store error.
    pub fn enqueue(
        &self,
        event_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let service = self.service.current();
        let consumer_id = options
            .consumer_id
            .or_else(|| service.consumer_id.clone());

        let priority = self
            .resolver
            .resolve(event_type, consumer_id.as_deref(), &payload);
        let gift_like = self.resolver.is_gift_like(event_type);

        let mut new_job = NewJob::new(event_type, payload, priority).with_max_attempts(
            options
                .max_attempts
                .unwrap_or(self.config.default_max_attempts),
        );
        if let Some(consumer_id) = consumer_id {
            new_job = new_job.with_consumer(consumer_id);
        }

        let job = {
            let _guard = self
                .enqueue_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match self
                .admission
                .admit(&*self.store, event_type, priority, gift_like)?
            {
                Admission::Accepted { .. } => {}
                Admission::Rejected(reason) => {
                    warn!(event_type, priority, %reason, "event rejected: queue full");
                    return Err(QueueError::QueueFull {
                        event_type: event_type.to_string(),
                        priority,
                        reason,
                    });
                }
            }
            self.store.insert(new_job, Utc::now())?
        };

        debug!(
            job_id = %job.id,
            event_type,
            priority,
            consumer_id = job.consumer_id.as_deref(),
            "job enqueued"
        );
        self.notify_processors();
        Ok(job.id)
    }

    // ---- consumer API ----

    /// Add or replace a handler on the active service.
    pub fn register_handler<F>(&self, event_type: &str, handler: F)
    where
        F: Fn(&Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.service
            .update_handlers(|set| set.register(event_type, handler));
        info!(event_type, "handler registered");
    }

    /// Validate and store a consumer's priority overrides.
    pub fn register_priority_profile(
        &self,
        consumer_id: &str,
        default_overrides: HashMap<String, i32>,
        gift_overrides: Option<GiftOverridesSpec>,
    ) -> Result<(), QueueError> {
        let profile = ServicePriorityProfile::new(default_overrides, gift_overrides)?;
        self.resolver.register_profile(consumer_id, profile);
        Ok(())
    }

    pub fn register_priority_profile_spec(
        &self,
        consumer_id: &str,
        spec: PriorityProfileSpec,
    ) -> Result<(), QueueError> {
        let profile = ServicePriorityProfile::try_from(spec)?;
        self.resolver.register_profile(consumer_id, profile);
        Ok(())
    }

    pub fn clear_priority_profile(&self, consumer_id: &str) -> bool {
        self.resolver.clear_profile(consumer_id)
    }

    /// Atomically bind a new handler set and profile.
    ///
    /// Jobs already claimed finish against the previous service. A profile
    /// that came in with the previous service is discarded with it.
    pub fn swap_active_consumer(&self, service: ActiveService) -> Arc<ActiveService> {
        if let (Some(id), Some(profile)) = (&service.consumer_id, &service.profile) {
            self.resolver.register_profile(id, profile.clone());
        }
        let incoming = service.consumer_id.clone();

        let previous = self.service.swap(service);
        if let Some(old) = previous.consumer_id.as_deref() {
            if previous.profile.is_some() && incoming.as_deref() != Some(old) {
                self.resolver.clear_profile(old);
            }
        }
        previous
    }

    // ---- introspection ----

    pub fn queue_status(&self) -> Result<QueueStatus, QueueError> {
        let per_status = self.store.status_counts()?;
        let per_event_type = self.store.active_event_type_counts()?;
        let current_size = per_status.active();
        let max_size = self.config.max_queue_size;

        Ok(QueueStatus {
            current_size,
            max_size,
            utilization_percent: utilization(current_size, max_size),
            per_status,
            per_event_type,
        })
    }

    pub fn health_status(&self) -> Result<HealthStatus, QueueError> {
        let counts = self.store.status_counts()?;
        let utilization_percent = utilization(counts.active(), self.config.max_queue_size);

        let window = ChronoDuration::from_std(self.config.health_window)
            .unwrap_or_else(|_| ChronoDuration::hours(1));
        let summary = self.store.log_summary(Utc::now() - window)?;
        let success_rate = summary.success_rate();

        let (status, issues) = assess_health(utilization_percent, success_rate);
        if status != HealthLevel::Healthy {
            warn!(%status, ?issues, "queue health degraded");
        }
        Ok(HealthStatus {
            status,
            issues,
            utilization_percent,
            success_rate,
        })
    }

    pub fn job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(id)?)
    }

    /// Newest first.
    pub fn recent_logs(&self, limit: usize) -> Result<Vec<ProcessingLog>, QueueError> {
        Ok(self.store.recent_logs(limit)?)
    }

    // ---- maintenance ----

    /// Drop every pending job. Jobs in flight finish normally.
    pub fn clear_queue(&self) -> Result<usize, QueueError> {
        let removed = self.store.clear_pending()?;
        info!(removed, "queue cleared");
        Ok(removed)
    }

    pub fn clear_completed(&self, older_than_hours: u32) -> Result<usize, QueueError> {
        self.purge(JobStatus::Completed, older_than_hours)
    }

    pub fn clear_failed(&self, older_than_hours: u32) -> Result<usize, QueueError> {
        self.purge(JobStatus::Failed, older_than_hours)
    }

    fn purge(&self, status: JobStatus, older_than_hours: u32) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - ChronoDuration::hours(i64::from(older_than_hours));
        let removed = self.store.purge_terminal(status, cutoff)?;
        info!(status = %status, older_than_hours, removed, "terminal jobs purged");
        Ok(removed)
    }

    /// Return `processing` jobs untouched for `timeout_minutes` to the queue.
    pub fn reset_stuck_jobs(&self, timeout_minutes: u32) -> Result<usize, QueueError> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::minutes(i64::from(timeout_minutes));
        let reset = self.store.reset_stuck(cutoff, None, now)?;
        if reset > 0 {
            warn!(reset, timeout_minutes, "stuck jobs reset");
            self.notify_processors();
        }
        Ok(reset)
    }

    /// Manual reset of a terminally failed job.
    pub fn retry_failed(&self, id: JobId) -> Result<Job, QueueError> {
        let job = self.store.retry_failed(id, Utc::now())?;
        info!(job_id = %id, event_type = %job.event_type, "failed job requeued");
        self.notify_processors();
        Ok(job)
    }

    pub fn optimize_queue(&self) -> Result<(), QueueError> {
        self.store.optimize()?;
        info!("queue storage optimized");
        Ok(())
    }

    // ---- processors ----

    /// Subscribe a processor's notifier to enqueue wake-ups. Held weakly.
    pub fn register_notifier(&self, notifier: &Arc<Notifier>) {
        self.notifiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(notifier));
    }

    /// Wake idle processors; dropped notifiers are pruned.
    pub fn notify_processors(&self) {
        let mut notifiers = self
            .notifiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        notifiers.retain(|weak| match weak.upgrade() {
            Some(notifier) => {
                notifier.signal();
                true
            }
            None => false,
        });
    }

    /// Build a processor bound to this queue's store and active service.
    ///
    /// Names get a numeric suffix so several processors can share one config.
    pub fn processor(&self, config: ProcessorConfig) -> JobProcessor<S> {
        let seq = self.processor_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", config.name, seq);
        let processor = JobProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.service),
            config.with_name(name),
        );
        self.register_notifier(&processor.notifier());
        processor
    }

    pub fn spawn_processor(&self, config: ProcessorConfig) -> io::Result<ProcessorHandle> {
        self.processor(config).spawn()
    }
}

impl<S: JobStore + ?Sized + 'static> fmt::Debug for QueueManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.config)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

fn utilization(current: usize, max: usize) -> f64 {
    if max == 0 {
        return 100.0;
    }
    current as f64 / max as f64 * 100.0
}
