//! The worker loop.
//!
//! A processor runs on its own thread and holds at most one job at a time:
//! claim, dispatch against the service snapshot taken at claim time, record
//! the outcome, repeat. With nothing to claim it parks on its [`Notifier`]
//! for at most the idle timeout.
//!
//! Per-job problems (missing handler, handler error or panic) end up as
//! store transitions and log rows. Only store errors leave [`JobProcessor::run_once`];
//! the loop answers them with a bounded pause.
//!
//! A job reset as stuck while its handler was still running may already
//! belong to another processor when the outcome is written. The store
//! refuses that write with `StoreError::NotOwner`; the processor logs it,
//! drops the outcome and moves on.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use livequeue_core::{FailOutcome, Job, JobId, ProcessingLog, StoreError};

use crate::config::ProcessorConfig;
use crate::dispatch::{ActiveService, Handler, HandlerResult, ServiceSlot};
use crate::notify::{Notifier, WakeReason};
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProcessorState {
    Stopped = 0,
    Running = 1,
    Idle = 2,
    Claiming = 3,
    Processing = 4,
    Draining = 5,
}

impl ProcessorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProcessorState::Running,
            2 => ProcessorState::Idle,
            3 => ProcessorState::Claiming,
            4 => ProcessorState::Processing,
            5 => ProcessorState::Draining,
            _ => ProcessorState::Stopped,
        }
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Skipped(String),
    /// Back to `pending`; claimable again at `available_at`.
    Retrying {
        error: String,
        available_at: DateTime<Utc>,
    },
    /// Retired as `failed`.
    Failed(String),
    /// The claim was reset and possibly taken over before the outcome was
    /// written; nothing was recorded.
    LostOwnership { claimed_by: Option<String> },
}

/// Processor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_skipped: u64,
    /// Failed attempts, retried or not.
    pub jobs_failed: u64,
    pub jobs_terminally_failed: u64,
    pub jobs_lost: u64,
    pub store_errors: u64,
    pub uptime_secs: u64,
}

impl ProcessorStats {
    fn record(&mut self, outcome: &JobOutcome) {
        if let JobOutcome::LostOwnership { .. } = outcome {
            self.jobs_lost += 1;
            return;
        }
        self.jobs_processed += 1;
        match outcome {
            JobOutcome::Completed => self.jobs_succeeded += 1,
            JobOutcome::Skipped(_) => self.jobs_skipped += 1,
            JobOutcome::Retrying { .. } => self.jobs_failed += 1,
            JobOutcome::Failed(_) => {
                self.jobs_failed += 1;
                self.jobs_terminally_failed += 1;
            }
            JobOutcome::LostOwnership { .. } => {}
        }
    }
}

/// State shared between a processor's thread and its handle.
#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    state: AtomicU8,
    stats: Mutex<ProcessorStats>,
    started: Instant,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            state: AtomicU8::new(ProcessorState::Stopped as u8),
            stats: Mutex::new(ProcessorStats::default()),
            started: Instant::now(),
        }
    }

    fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Loop-side transition; never overrides `Draining`.
    fn enter(&self, next: ProcessorState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ProcessorState::Draining as u8).then_some(next as u8)
            });
    }

    fn force(&self, next: ProcessorState) {
        self.state.store(next as u8, Ordering::Release);
    }

    fn stats(&self) -> MutexGuard<'_, ProcessorStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// One logical worker bound to a store and an active-service slot.
pub struct JobProcessor<S: JobStore + ?Sized + 'static> {
    store: Arc<S>,
    service: Arc<ServiceSlot>,
    notifier: Arc<Notifier>,
    config: ProcessorConfig,
    shared: Arc<Shared>,
}

impl<S: JobStore + ?Sized + 'static> JobProcessor<S> {
    pub fn new(store: Arc<S>, service: Arc<ServiceSlot>, config: ProcessorConfig) -> Self {
        Self {
            store,
            service,
            notifier: Arc::new(Notifier::new()),
            config,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Wake-up channel for this processor's idle wait.
    pub fn notifier(&self) -> Arc<Notifier> {
        Arc::clone(&self.notifier)
    }

    pub fn stats(&self) -> ProcessorStats {
        let mut stats = self.shared.stats().clone();
        stats.uptime_secs = self.shared.started.elapsed().as_secs();
        stats
    }

    /// Claim and process a single job. `Ok(None)` when nothing is eligible.
    pub fn run_once(&self) -> Result<Option<(JobId, JobOutcome)>, StoreError> {
        self.shared.enter(ProcessorState::Claiming);
        let claimed = match self.store.claim_next(&self.config.name, Utc::now()) {
            Ok(claimed) => claimed,
            Err(e) => {
                self.shared.stats().store_errors += 1;
                return Err(e);
            }
        };
        let Some(job) = claimed else {
            return Ok(None);
        };
        // Handlers and predicate are fixed for this job from here on.
        let service = self.service.current();

        self.shared.enter(ProcessorState::Processing);
        debug!(
            processor = %self.config.name,
            job_id = %job.id,
            event_type = %job.event_type,
            priority = job.priority,
            attempt = job.attempts,
            "job claimed"
        );

        let outcome = match self.process(&job, &service) {
            Ok(outcome) => outcome,
            Err(StoreError::NotOwner { claimed_by, .. }) => {
                warn!(
                    processor = %self.config.name,
                    job_id = %job.id,
                    event_type = %job.event_type,
                    claimed_by = claimed_by.as_deref().unwrap_or("-"),
                    "lost ownership of job; outcome discarded"
                );
                JobOutcome::LostOwnership { claimed_by }
            }
            Err(e) => {
                self.shared.stats().store_errors += 1;
                return Err(e);
            }
        };
        self.shared.stats().record(&outcome);
        self.shared.enter(ProcessorState::Running);
        Ok(Some((job.id, outcome)))
    }

    fn process(&self, job: &Job, service: &ActiveService) -> Result<JobOutcome, StoreError> {
        let name = self.config.name.as_str();
        let started = Instant::now();

        let Some(handler) = service.handlers.handler_for(&job.event_type) else {
            let reason = format!("No handler for event type '{}'", job.event_type);
            let now = Utc::now();
            self.store.mark_dead(job.id, name, &reason, now)?;
            self.store.append_log(ProcessingLog::failed(
                job.id,
                &job.event_type,
                job.payload.clone(),
                &reason,
                job.attempts,
                true,
                elapsed_ms(started),
                now,
            ))?;
            warn!(processor = %name, job_id = %job.id, event_type = %job.event_type, "no handler; job failed");
            return Ok(JobOutcome::Failed(reason));
        };

        let result = match service
            .handlers
            .admission()
            .map(|admit| admit(&job.event_type, &job.payload))
        {
            Some(Err(reason)) => HandlerResult::Skip(reason),
            _ => invoke(handler, job),
        };
        let duration_ms = elapsed_ms(started);
        let now = Utc::now();

        match result {
            HandlerResult::Success => {
                self.store.mark_completed(job.id, name, now)?;
                self.store.append_log(ProcessingLog::success(
                    job.id,
                    &job.event_type,
                    job.payload.clone(),
                    job.attempts,
                    duration_ms,
                    now,
                ))?;
                debug!(processor = %name, job_id = %job.id, duration_ms, "job completed");
                Ok(JobOutcome::Completed)
            }
            HandlerResult::Skip(reason) => {
                self.store.mark_skipped(job.id, name, &reason, now)?;
                self.store.append_log(ProcessingLog::skipped(
                    job.id,
                    &job.event_type,
                    job.payload.clone(),
                    &reason,
                    job.attempts,
                    duration_ms,
                    now,
                ))?;
                info!(processor = %name, job_id = %job.id, event_type = %job.event_type, %reason, "job skipped");
                Ok(JobOutcome::Skipped(reason))
            }
            HandlerResult::Failure(error) => {
                // Attempts already include this claim.
                let delay = self.config.retry.delay_for_attempt(job.attempts);
                let outcome = self.store.mark_failed(job.id, name, &error, delay, now)?;
                self.store.append_log(ProcessingLog::failed(
                    job.id,
                    &job.event_type,
                    job.payload.clone(),
                    &error,
                    job.attempts,
                    outcome.is_terminal(),
                    duration_ms,
                    now,
                ))?;

                match outcome {
                    FailOutcome::Retrying { available_at } => {
                        warn!(
                            processor = %name,
                            job_id = %job.id,
                            event_type = %job.event_type,
                            attempt = job.attempts,
                            max_attempts = job.max_attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            %error,
                            "job failed; will retry"
                        );
                        Ok(JobOutcome::Retrying {
                            error,
                            available_at,
                        })
                    }
                    FailOutcome::Failed => {
                        error!(
                            processor = %name,
                            job_id = %job.id,
                            event_type = %job.event_type,
                            attempts = job.attempts,
                            %error,
                            "job failed permanently"
                        );
                        Ok(JobOutcome::Failed(error))
                    }
                }
            }
        }
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<ProcessorHandle> {
        let name = self.config.name.clone();
        let shared = Arc::clone(&self.shared);
        let notifier = Arc::clone(&self.notifier);
        let shutdown_timeout = self.config.shutdown_timeout;
        let stuck_grace = self.config.stuck_grace;

        let store = Arc::clone(&self.store);
        let release: ReleaseFn = Box::new(
            move |owner: &str, cutoff: DateTime<Utc>, now: DateTime<Utc>| {
                store.reset_stuck(cutoff, Some(owner), now)
            },
        );

        let (done_tx, done_rx) = mpsc::channel::<()>();
        shared.running.store(true, Ordering::Release);
        shared.force(ProcessorState::Running);

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = DoneGuard(done_tx);
            processor_loop(self);
        });
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                shared.running.store(false, Ordering::Release);
                shared.force(ProcessorState::Stopped);
                return Err(e);
            }
        };

        Ok(ProcessorHandle {
            name,
            shared,
            notifier,
            done: done_rx,
            join: Some(join),
            release,
            shutdown_timeout,
            stuck_grace,
        })
    }
}

impl<S: JobStore + ?Sized + 'static> fmt::Debug for JobProcessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobProcessor")
            .field("config", &self.config)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

fn processor_loop<S: JobStore + ?Sized + 'static>(processor: JobProcessor<S>) {
    let name = processor.config.name.clone();
    let shared = Arc::clone(&processor.shared);
    info!(processor = %name, "job processor started");

    while shared.is_running() {
        match processor.run_once() {
            Ok(Some(_)) => {}
            Ok(None) => {
                shared.enter(ProcessorState::Idle);
                match processor.notifier.wait(processor.config.idle_timeout) {
                    WakeReason::Signalled => debug!(processor = %name, "woken by new job"),
                    WakeReason::TimedOut => {}
                    WakeReason::Closed => break,
                }
                shared.enter(ProcessorState::Running);
            }
            Err(e) => {
                error!(
                    processor = %name,
                    error = %e,
                    pause_ms = processor.config.store_error_pause.as_millis() as u64,
                    "job store error; pausing"
                );
                shared.enter(ProcessorState::Idle);
                if processor.notifier.wait(processor.config.store_error_pause) == WakeReason::Closed {
                    break;
                }
                shared.enter(ProcessorState::Running);
            }
        }
    }

    shared.enter(ProcessorState::Stopped);
    info!(processor = %name, "job processor loop exited");
}

fn invoke(handler: &Handler, job: &Job) -> HandlerResult {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(&job.payload))) {
        Ok(result) => result,
        Err(payload) => HandlerResult::Failure(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("handler panicked: {detail}"),
        None => "handler panicked".to_string(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Signals the handle when the loop thread ends, including by panic.
struct DoneGuard(mpsc::Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

type ReleaseFn =
    Box<dyn Fn(&str, DateTime<Utc>, DateTime<Utc>) -> Result<usize, StoreError> + Send + Sync>;

/// Result of a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// The loop finished its in-flight job within the shutdown timeout.
    pub drained: bool,
    /// Own `processing` jobs handed back to the queue afterwards.
    pub reset_jobs: usize,
}

/// Handle to control a running processor.
pub struct ProcessorHandle {
    name: String,
    shared: Arc<Shared>,
    notifier: Arc<Notifier>,
    done: mpsc::Receiver<()>,
    join: Option<thread::JoinHandle<()>>,
    release: ReleaseFn,
    shutdown_timeout: Duration,
    stuck_grace: Duration,
}

impl ProcessorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessorState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn stats(&self) -> ProcessorStats {
        let mut stats = self.shared.stats().clone();
        stats.uptime_secs = self.shared.started.elapsed().as_secs();
        stats
    }

    /// Wake the processor if it is idle.
    pub fn wake(&self) {
        self.notifier.signal();
    }

    /// Stop claiming, wait for the in-flight job (bounded by the shutdown
    /// timeout), then hand this processor's stuck jobs back to the queue.
    pub fn shutdown(mut self) -> ShutdownReport {
        info!(processor = %self.name, "job processor draining");
        self.shared.force(ProcessorState::Draining);
        self.shared.running.store(false, Ordering::Release);
        self.notifier.close();

        let drained = match self.done.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        if drained {
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        } else {
            warn!(
                processor = %self.name,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "in-flight job did not finish before shutdown timeout"
            );
            // Detach; the thread exits on its own once the handler returns.
            self.join.take();
        }

        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(self.stuck_grace).unwrap_or_default();
        let reset_jobs = match (self.release)(&self.name, cutoff, now) {
            Ok(n) => n,
            Err(e) => {
                error!(processor = %self.name, error = %e, "failed to reset stuck jobs on shutdown");
                0
            }
        };

        self.shared.force(ProcessorState::Stopped);
        info!(processor = %self.name, drained, reset_jobs, "job processor stopped");
        ShutdownReport {
            drained,
            reset_jobs,
        }
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        // Dropped without shutdown(): stop the loop but do not wait.
        self.shared.running.store(false, Ordering::Release);
        self.notifier.close();
    }
}

impl fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{HandlerSet, streak_final_only};
    use crate::store::InMemoryJobStore;
    use livequeue_core::{JobStatus, LogStatus, NewJob, RetryPolicy};
    use serde_json::json;

    fn setup(handlers: HandlerSet) -> (Arc<InMemoryJobStore>, JobProcessor<InMemoryJobStore>) {
        setup_on(InMemoryJobStore::arc(), handlers)
    }

    fn setup_on(
        store: Arc<InMemoryJobStore>,
        handlers: HandlerSet,
    ) -> (Arc<InMemoryJobStore>, JobProcessor<InMemoryJobStore>) {
        let slot = Arc::new(ServiceSlot::new(ActiveService::new("test", handlers)));
        let config = ProcessorConfig::default()
            .with_name("p1")
            .with_idle_timeout(Duration::from_millis(20))
            .with_retry_policy(RetryPolicy::exponential(
                Duration::from_secs(5),
                Duration::from_secs(300),
            ));
        let processor = JobProcessor::new(Arc::clone(&store), slot, config);
        (store, processor)
    }

    fn enqueue(store: &InMemoryJobStore, event_type: &str, payload: serde_json::Value) -> JobId {
        store
            .insert(NewJob::new(event_type, payload, 50), Utc::now())
            .unwrap()
            .id
    }

    #[test]
    fn nothing_to_do() {
        let (_store, processor) = setup(HandlerSet::new());
        assert_eq!(processor.run_once().unwrap(), None);
    }

    #[test]
    fn success_completes_and_logs() {
        let (store, processor) =
            setup(HandlerSet::new().with_handler("chat", |_| HandlerResult::Success));
        let id = enqueue(&store, "chat", json!({"comment": "hi"}));

        let (claimed, outcome) = processor.run_once().unwrap().unwrap();
        assert_eq!(claimed, id);
        assert_eq!(outcome, JobOutcome::Completed);

        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.processed_at.is_some());
        let logs = store.recent_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].payload, json!({"comment": "hi"}));
    }

    #[test]
    fn missing_handler_fails_immediately() {
        let (store, processor) = setup(HandlerSet::new());
        let id = enqueue(&store, "share", json!({}));

        let (_, outcome) = processor.run_once().unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed(ref e) if e.contains("No handler")));
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        let logs = store.recent_logs(1).unwrap();
        assert!(logs[0].terminal);
    }

    #[test]
    fn failure_schedules_retry_with_backoff() {
        let (store, processor) = setup(
            HandlerSet::new().with_handler("follow", |_| HandlerResult::Failure("offline".into())),
        );
        let id = enqueue(&store, "follow", json!({}));
        let before = Utc::now();

        let (_, outcome) = processor.run_once().unwrap().unwrap();
        let JobOutcome::Retrying { error, available_at } = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(error, "offline");
        assert!(available_at >= before + chrono::Duration::seconds(5));

        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.last_error.as_deref(), Some("offline"));
        // Not claimable until the backoff passes.
        assert_eq!(processor.run_once().unwrap(), None);
        assert_eq!(processor.stats().jobs_failed, 1);
    }

    #[test]
    fn panicking_handler_is_a_transient_failure() {
        let (store, processor) =
            setup(HandlerSet::new().with_handler("like", |_| panic!("rcon socket closed")));
        let id = enqueue(&store, "like", json!({}));

        let (_, outcome) = processor.run_once().unwrap().unwrap();
        assert!(
            matches!(outcome, JobOutcome::Retrying { ref error, .. } if error.contains("rcon socket closed"))
        );
        assert_eq!(store.get(id).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn admission_predicate_skips_without_calling_handler() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handlers = HandlerSet::new()
            .with_handler("gift", move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Success
            })
            .with_admission(streak_final_only());
        let (store, processor) = setup(handlers);
        let id = enqueue(&store, "gift", json!({"giftType": 1, "repeatEnd": false}));

        let (_, outcome) = processor.run_once().unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::Skipped(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert!(job.skip_reason.is_some());
        assert_eq!(store.recent_logs(1).unwrap()[0].status, LogStatus::Skipped);
    }

    #[test]
    fn stats_count_outcomes() {
        let (store, processor) = setup(
            HandlerSet::new()
                .with_handler("chat", |_| HandlerResult::Success)
                .with_handler("like", |_| HandlerResult::Skip("dupe".into())),
        );
        enqueue(&store, "chat", json!({}));
        enqueue(&store, "like", json!({}));
        while processor.run_once().unwrap().is_some() {}

        let stats = processor.stats();
        assert_eq!(stats.jobs_processed, 2);
        assert_eq!(stats.jobs_succeeded, 1);
        assert_eq!(stats.jobs_skipped, 1);
    }

    #[test]
    fn outcome_is_dropped_when_the_job_was_taken_over() {
        let store = InMemoryJobStore::arc();
        let takeover = Arc::clone(&store);
        // While the handler runs, the job is reset as stuck and re-claimed.
        let handlers = HandlerSet::new().with_handler("chat", move |_| {
            let later = Utc::now() + chrono::Duration::seconds(1);
            assert_eq!(takeover.reset_stuck(later, Some("p1"), Utc::now()).unwrap(), 1);
            takeover.claim_next("p2", Utc::now()).unwrap().unwrap();
            HandlerResult::Failure("late".into())
        });
        let (store, processor) = setup_on(store, handlers);
        let id = enqueue(&store, "chat", json!({}));

        let (claimed, outcome) = processor.run_once().unwrap().unwrap();
        assert_eq!(claimed, id);
        assert_eq!(
            outcome,
            JobOutcome::LostOwnership {
                claimed_by: Some("p2".to_string())
            }
        );

        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.claimed_by.as_deref(), Some("p2"));
        assert!(job.last_error.is_none());
        assert!(store.recent_logs(10).unwrap().is_empty());

        let stats = processor.stats();
        assert_eq!(stats.jobs_lost, 1);
        assert_eq!(stats.jobs_processed, 0);
        assert_eq!(stats.jobs_failed, 0);
        assert_eq!(stats.store_errors, 0);
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"boom"), "handler panicked: boom");
        assert_eq!(panic_message(&String::from("bang")), "handler panicked: bang");
        assert_eq!(panic_message(&42u8), "handler panicked");
    }

    #[test]
    fn spawned_processor_drains_and_stops() {
        let (store, processor) =
            setup(HandlerSet::new().with_handler("chat", |_| HandlerResult::Success));
        let id = enqueue(&store, "chat", json!({}));

        let handle = processor.spawn().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get(id).unwrap().unwrap().status != JobStatus::Completed {
            assert!(Instant::now() < deadline, "job was not processed");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_running());

        let report = handle.shutdown();
        assert!(report.drained);
        assert_eq!(report.reset_jobs, 0);
    }

    #[test]
    fn shutdown_timeout_resets_the_stuck_job() {
        let (store, processor) = setup(HandlerSet::new().with_handler("chat", |_| {
            thread::sleep(Duration::from_millis(500));
            HandlerResult::Success
        }));
        let processor = JobProcessor {
            config: processor
                .config
                .clone()
                .with_shutdown_timeout(Duration::from_millis(50))
                .with_stuck_grace(Duration::ZERO),
            ..processor
        };
        let id = enqueue(&store, "chat", json!({}));

        let handle = processor.spawn().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get(id).unwrap().unwrap().status != JobStatus::Processing {
            assert!(Instant::now() < deadline, "job was not claimed");
            thread::sleep(Duration::from_millis(1));
        }

        let report = handle.shutdown();
        assert!(!report.drained);
        assert_eq!(report.reset_jobs, 1);
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.claimed_by, None);

        // The detached handler finishes later; its completion is refused.
        thread::sleep(Duration::from_millis(700));
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(store.recent_logs(10).unwrap().is_empty());
    }
}
