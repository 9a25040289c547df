//! In-memory job store for tests/dev.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use livequeue_core::{
    FailOutcome, Job, JobId, JobStatus, LogSummary, NewJob, ProcessingLog, StatusCounts,
    StoreError,
};

use super::JobStore;

/// Processing log rows kept by default.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// In-memory job store.
///
/// Claims follow the same find-then-conditionally-update protocol as the
/// durable stores: the candidate is chosen under a read lock and the flip to
/// `processing` re-checks eligibility under the write lock, so concurrent
/// processors really do lose races and retry.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    log: RwLock<VecDeque<ProcessingLog>>,
    log_capacity: usize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_log_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Keep at most `capacity` log rows; the oldest are dropped first.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            log: RwLock::new(VecDeque::new()),
            log_capacity: capacity.max(1),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn jobs(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, StoreError> {
        self.jobs.read().map_err(|_| StoreError::Poisoned)
    }

    fn jobs_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, StoreError> {
        self.jobs.write().map_err(|_| StoreError::Poisoned)
    }

    fn log(&self) -> Result<RwLockReadGuard<'_, VecDeque<ProcessingLog>>, StoreError> {
        self.log.read().map_err(|_| StoreError::Poisoned)
    }

    fn log_mut(&self) -> Result<RwLockWriteGuard<'_, VecDeque<ProcessingLog>>, StoreError> {
        self.log.write().map_err(|_| StoreError::Poisoned)
    }

    /// Apply `f` to one job under the write lock.
    fn with_job<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs_mut()?;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(job)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = Job::from_new(job, now);
        self.jobs_mut()?.insert(job.id, job.clone());
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs()?.get(&id).cloned())
    }

    fn next_candidate(&self, now: DateTime<Utc>) -> Result<Option<JobId>, StoreError> {
        let jobs = self.jobs()?;
        Ok(jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .min_by(|a, b| Job::claim_order(a, b))
            .map(|j| j.id))
    }

    fn try_claim(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs_mut()?;
        match jobs.get_mut(&id) {
            Some(job) if job.is_claimable(now) => {
                job.claim(owner, now);
                Ok(Some(job.clone()))
            }
            // Claimed by someone else or deleted since it was selected.
            _ => Ok(None),
        }
    }

    fn mark_completed(&self, id: JobId, owner: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_job(id, |job| job.try_complete(owner, now))
    }

    fn mark_skipped(
        &self,
        id: JobId,
        owner: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_job(id, |job| job.try_skip(owner, reason, now))
    }

    fn mark_failed(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, StoreError> {
        self.with_job(id, |job| job.try_fail(owner, error, retry_delay, now))
    }

    fn mark_dead(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_job(id, |job| job.try_fail_permanently(owner, error, now))
    }

    fn append_log(&self, record: ProcessingLog) -> Result<(), StoreError> {
        let mut log = self.log_mut()?;
        while log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(record);
        Ok(())
    }

    fn recent_logs(&self, limit: usize) -> Result<Vec<ProcessingLog>, StoreError> {
        Ok(self.log()?.iter().rev().take(limit).cloned().collect())
    }

    fn log_summary(&self, since: DateTime<Utc>) -> Result<LogSummary, StoreError> {
        let mut summary = LogSummary::default();
        for record in self.log()?.iter().filter(|r| r.processed_at >= since) {
            summary.record(record.status);
        }
        Ok(summary)
    }

    fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for job in self.jobs()?.values() {
            counts.record(job.status);
        }
        Ok(counts)
    }

    fn active_event_type_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let mut counts = BTreeMap::new();
        for job in self.jobs()?.values().filter(|j| j.status.is_active()) {
            *counts.entry(job.event_type.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn evict_pending(
        &self,
        limit: usize,
        below_priority: i32,
        protected_event_types: &[String],
    ) -> Result<usize, StoreError> {
        let mut jobs = self.jobs_mut()?;

        let mut victims: Vec<&Job> = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && j.priority < below_priority
                    && !protected_event_types.contains(&j.event_type)
            })
            .collect();
        victims.sort_by_key(|j| (j.created_at, j.id));
        let ids: Vec<JobId> = victims.into_iter().take(limit).map(|j| j.id).collect();

        for id in &ids {
            jobs.remove(id);
        }
        Ok(ids.len())
    }

    fn clear_pending(&self) -> Result<usize, StoreError> {
        let mut jobs = self.jobs_mut()?;
        let before = jobs.len();
        jobs.retain(|_, j| j.status != JobStatus::Pending);
        Ok(before - jobs.len())
    }

    fn purge_terminal(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if !status.is_terminal() {
            return Ok(0);
        }
        let mut jobs = self.jobs_mut()?;
        let before = jobs.len();
        jobs.retain(|_, j| {
            let finished = j.processed_at.unwrap_or(j.updated_at);
            !(j.status == status && finished < older_than)
        });
        Ok(before - jobs.len())
    }

    fn reset_stuck(
        &self,
        updated_before: DateTime<Utc>,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut jobs = self.jobs_mut()?;
        let mut reset = 0;
        for job in jobs.values_mut().filter(|j| {
            j.status == JobStatus::Processing
                && j.updated_at < updated_before
                && owner.is_none_or(|o| j.claimed_by.as_deref() == Some(o))
        }) {
            job.release_stuck(now);
            reset += 1;
        }
        Ok(reset)
    }

    fn retry_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.with_job(id, |job| {
            job.try_retry_manually(now)?;
            Ok(job.clone())
        })
    }

    fn optimize(&self) -> Result<(), StoreError> {
        self.jobs_mut()?.shrink_to_fit();
        self.log_mut()?.shrink_to_fit();
        Ok(())
    }
}
