//! Job store abstraction and the claim protocol.
//!
//! ## Claim protocol
//!
//! Claiming is two steps, mirrored by every backend:
//!
//! 1. [`JobStore::next_candidate`]: find the single eligible job (pending,
//!    `available_at <= now`, `attempts < max_attempts`) with the highest
//!    priority, ties broken by earliest `available_at`
//! 2. [`JobStore::try_claim`]: flip it to `processing` and increment
//!    `attempts`, but only if it is still `pending` at commit time
//!
//! A `None` from step 2 means another processor won the race; the caller
//! re-runs step 1 for a different job. This conditional update is the only
//! concurrency control the engine relies on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use livequeue_core::{
    FailOutcome, Job, JobId, JobStatus, LogSummary, NewJob, ProcessingLog, StatusCounts,
    StoreError,
};

mod in_memory;

pub use in_memory::InMemoryJobStore;

/// Lost races tolerated by a single [`JobStore::claim_next`] call before it
/// reports "nothing available" and lets the caller back off.
pub const MAX_CLAIM_RACES: usize = 16;

/// Durable, transactional job storage.
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job, claimable from `now`.
    fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError>;

    fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Step 1 of the claim protocol.
    fn next_candidate(&self, now: DateTime<Utc>) -> Result<Option<JobId>, StoreError>;

    /// Step 2 of the claim protocol. `Ok(None)` means the race was lost.
    fn try_claim(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Claim the best eligible job, retrying past lost races.
    fn claim_next(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        for _ in 0..MAX_CLAIM_RACES {
            let Some(id) = self.next_candidate(now)? else {
                return Ok(None);
            };
            match self.try_claim(id, owner, now)? {
                Some(job) => return Ok(Some(job)),
                None => debug!(job_id = %id, owner, "claim race lost; retrying"),
            }
        }
        warn!(owner, races = MAX_CLAIM_RACES, "giving up claim after repeated lost races");
        Ok(None)
    }

    // Outcome writes name the claiming processor as `owner`. They fail with
    // `StoreError::NotOwner` unless the job is still `processing` under that
    // claim, so a processor whose job was reset as stuck cannot overwrite
    // the next owner's state.

    /// Idempotent: sets `completed` and `processed_at`.
    fn mark_completed(&self, id: JobId, owner: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// `completed` with a skip marker; never retried.
    fn mark_skipped(
        &self,
        id: JobId,
        owner: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `failed` when attempts are exhausted, else `pending` at `now + retry_delay`.
    fn mark_failed(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, StoreError>;

    /// Retire as `failed` regardless of remaining attempts.
    fn mark_dead(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn append_log(&self, record: ProcessingLog) -> Result<(), StoreError>;

    /// Newest first.
    fn recent_logs(&self, limit: usize) -> Result<Vec<ProcessingLog>, StoreError>;

    fn log_summary(&self, since: DateTime<Utc>) -> Result<LogSummary, StoreError>;

    fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Pending + processing jobs per event type.
    fn active_event_type_counts(&self) -> Result<BTreeMap<String, usize>, StoreError>;

    /// Delete up to `limit` of the oldest `pending` jobs whose priority is
    /// below `below_priority` and whose event type is not protected.
    fn evict_pending(
        &self,
        limit: usize,
        below_priority: i32,
        protected_event_types: &[String],
    ) -> Result<usize, StoreError>;

    /// Delete every `pending` job. Jobs being processed are left to finish.
    fn clear_pending(&self) -> Result<usize, StoreError>;

    /// Delete terminal jobs of `status` finished before `older_than`.
    fn purge_terminal(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Reset `processing` jobs last touched before `updated_before` back to
    /// `pending`, optionally only those claimed by `owner`.
    fn reset_stuck(
        &self,
        updated_before: DateTime<Utc>,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Manual reset of a terminally `failed` job.
    fn retry_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError>;

    /// Backend-specific compaction.
    fn optimize(&self) -> Result<(), StoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        (**self).insert(job, now)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(id)
    }

    fn next_candidate(&self, now: DateTime<Utc>) -> Result<Option<JobId>, StoreError> {
        (**self).next_candidate(now)
    }

    fn try_claim(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        (**self).try_claim(id, owner, now)
    }

    fn claim_next(&self, owner: &str, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        (**self).claim_next(owner, now)
    }

    fn mark_completed(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_completed(id, owner, now)
    }

    fn mark_skipped(
        &self,
        id: JobId,
        owner: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_skipped(id, owner, reason, now)
    }

    fn mark_failed(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, StoreError> {
        (**self).mark_failed(id, owner, error, retry_delay, now)
    }

    fn mark_dead(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_dead(id, owner, error, now)
    }

    fn append_log(&self, record: ProcessingLog) -> Result<(), StoreError> {
        (**self).append_log(record)
    }

    fn recent_logs(&self, limit: usize) -> Result<Vec<ProcessingLog>, StoreError> {
        (**self).recent_logs(limit)
    }

    fn log_summary(&self, since: DateTime<Utc>) -> Result<LogSummary, StoreError> {
        (**self).log_summary(since)
    }

    fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        (**self).status_counts()
    }

    fn active_event_type_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        (**self).active_event_type_counts()
    }

    fn evict_pending(
        &self,
        limit: usize,
        below_priority: i32,
        protected_event_types: &[String],
    ) -> Result<usize, StoreError> {
        (**self).evict_pending(limit, below_priority, protected_event_types)
    }

    fn clear_pending(&self) -> Result<usize, StoreError> {
        (**self).clear_pending()
    }

    fn purge_terminal(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        (**self).purge_terminal(status, older_than)
    }

    fn reset_stuck(
        &self,
        updated_before: DateTime<Utc>,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        (**self).reset_stuck(updated_before, owner, now)
    }

    fn retry_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        (**self).retry_failed(id, now)
    }

    fn optimize(&self) -> Result<(), StoreError> {
        (**self).optimize()
    }
}
