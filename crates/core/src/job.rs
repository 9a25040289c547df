//! Persisted job rows and their state machine.
//!
//! ```text
//! pending --claim--> processing --success/skip--> completed
//! processing --failure, attempts < max--> pending (available_at pushed out)
//! processing --failure, attempts >= max--> failed
//! ```
//!
//! The transition methods on [`Job`] are what a store applies inside its
//! own atomic section; they never perform IO themselves.

use core::cmp::Ordering;
use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ParseError, StoreError};
use crate::id::JobId;

/// Attempts allowed when the producer does not ask for a specific ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// `last_error` of a job retired because it was stuck on its final attempt.
pub const STUCK_FINAL_ATTEMPT_ERROR: &str = "processing timed out on final attempt";

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly not before `available_at`)
    Pending,
    /// Claimed by exactly one processor
    Processing,
    /// Handled successfully or skipped
    Completed,
    /// Exhausted its attempts, never retried automatically
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Counted against the queue's capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// A job ready to be inserted (no id, no timestamps yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub event_type: String,
    pub payload: Value,
    /// Resolved once at enqueue time; immutable afterwards.
    pub priority: i32,
    pub max_attempts: u32,
    /// Consumer whose priority profile produced `priority`.
    pub consumer_id: Option<String>,
}

impl NewJob {
    pub fn new(event_type: impl Into<String>, payload: Value, priority: i32) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            priority,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            consumer_id: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_consumer(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub event_type: String,
    /// Passed verbatim to the handler.
    pub payload: Value,
    pub priority: i32,
    pub status: JobStatus,
    /// Claims so far; incremented on every successful claim.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Not claimable before this instant (retry backoff).
    pub available_at: DateTime<Utc>,
    /// Set when the job reaches `completed` or `failed`.
    pub processed_at: Option<DateTime<Utc>>,
    pub consumer_id: Option<String>,
    /// Processor currently owning the job (only while `processing`).
    pub claimed_by: Option<String>,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to `pending`, claimable again at `available_at`.
    Retrying { available_at: DateTime<Utc> },
    /// Attempts exhausted; retired as `failed`.
    Failed,
}

impl FailOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailOutcome::Failed)
    }
}

impl Job {
    /// Materialize a new row. `max_attempts` is clamped to at least 1.
    pub fn from_new(new: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            event_type: new.event_type,
            payload: new.payload,
            priority: new.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts.max(1),
            available_at: now,
            processed_at: None,
            consumer_id: new.consumer_id,
            claimed_by: None,
            last_error: None,
            skip_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.attempts < self.max_attempts
            && self.available_at <= now
    }

    /// Candidate order: highest priority first, then earliest `available_at`,
    /// then insertion order.
    pub fn claim_order(a: &Job, b: &Job) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.available_at.cmp(&b.available_at))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Flip to `processing` and count the attempt.
    pub fn claim(&mut self, owner: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.claimed_by = Some(owner.to_string());
        self.updated_at = now;
    }

    /// Idempotent: completing a completed job leaves it untouched.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Completed {
            return;
        }
        self.status = JobStatus::Completed;
        self.processed_at = Some(now);
        self.claimed_by = None;
        self.updated_at = now;
    }

    /// Completed without running the handler; never retried.
    pub fn skip(&mut self, reason: &str, now: DateTime<Utc>) {
        self.skip_reason = Some(reason.to_string());
        self.complete(now);
    }

    /// Record a failed attempt. `attempts` is not reset.
    pub fn fail(&mut self, error: &str, retry_delay: Duration, now: DateTime<Utc>) -> FailOutcome {
        self.last_error = Some(error.to_string());
        self.claimed_by = None;
        self.updated_at = now;

        if self.attempts >= self.max_attempts {
            self.status = JobStatus::Failed;
            self.processed_at = Some(now);
            return FailOutcome::Failed;
        }

        // Delays past chrono's range saturate instead of retrying at once.
        let retry_at = chrono::Duration::from_std(retry_delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        // available_at only moves forward
        self.available_at = self.available_at.max(retry_at);
        self.status = JobStatus::Pending;
        FailOutcome::Retrying {
            available_at: self.available_at,
        }
    }

    /// Retire immediately, whatever the attempt count.
    pub fn fail_permanently(&mut self, error: &str, now: DateTime<Utc>) {
        self.last_error = Some(error.to_string());
        self.status = JobStatus::Failed;
        self.processed_at = Some(now);
        self.claimed_by = None;
        self.updated_at = now;
    }

    /// Give a stuck `processing` job back to the queue.
    ///
    /// A job whose interrupted claim was its last allowed attempt can never be
    /// claimed again, so it is retired as `failed` instead. Returns the new status.
    pub fn release_stuck(&mut self, now: DateTime<Utc>) -> JobStatus {
        if self.attempts >= self.max_attempts {
            self.fail_permanently(STUCK_FINAL_ATTEMPT_ERROR, now);
        } else {
            self.status = JobStatus::Pending;
            self.claimed_by = None;
            self.updated_at = now;
        }
        self.status
    }

    /// Manual reset of a terminally failed job: fresh attempt budget, claimable now.
    pub fn retry_manually(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.available_at = now;
        self.processed_at = None;
        self.claimed_by = None;
        self.last_error = None;
        self.updated_at = now;
    }
}

/// Guarded transitions applied by stores. A refused transition leaves the
/// job untouched.
///
/// Outcome writes carry the claiming processor's name and only land while
/// that processor still holds the claim. Once a job has been reset as stuck
/// or re-claimed, the late writer gets [`StoreError::NotOwner`].
impl Job {
    fn refuse(&self, operation: &'static str) -> StoreError {
        StoreError::InvalidTransition {
            id: self.id,
            status: self.status.to_string(),
            operation,
        }
    }

    /// `Ok` only for a `processing` job claimed by `owner`.
    fn check_owner(&self, owner: &str, operation: &'static str) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(self.refuse(operation));
        }
        if self.status == JobStatus::Processing && self.claimed_by.as_deref() == Some(owner) {
            return Ok(());
        }
        Err(StoreError::NotOwner {
            id: self.id,
            owner: owner.to_string(),
            claimed_by: self.claimed_by.clone(),
        })
    }

    /// Completing twice is a no-op; a `failed` job cannot complete.
    pub fn try_complete(&mut self, owner: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status == JobStatus::Completed {
            return Ok(());
        }
        self.check_owner(owner, "complete")?;
        self.complete(now);
        Ok(())
    }

    pub fn try_skip(
        &mut self,
        owner: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_owner(owner, "skip")?;
        self.skip(reason, now);
        Ok(())
    }

    pub fn try_fail(
        &mut self,
        owner: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, StoreError> {
        self.check_owner(owner, "fail")?;
        Ok(self.fail(error, retry_delay, now))
    }

    /// Retiring an already `failed` job is a no-op.
    pub fn try_fail_permanently(
        &mut self,
        owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.status == JobStatus::Failed {
            return Ok(());
        }
        self.check_owner(owner, "fail")?;
        self.fail_permanently(error, now);
        Ok(())
    }

    pub fn try_retry_manually(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status != JobStatus::Failed {
            return Err(self.refuse("retry"));
        }
        self.retry_manually(now);
        Ok(())
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: JobStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
        }
    }

    /// Pending + processing: what counts against the queue's capacity.
    pub fn active(&self) -> usize {
        self.pending + self.processing
    }

    pub fn total(&self) -> usize {
        self.active() + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(max_attempts: u32, now: DateTime<Utc>) -> Job {
        Job::from_new(
            NewJob::new("chat", json!({"comment": "hi"}), 50).with_max_attempts(max_attempts),
            now,
        )
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn lifecycle_success() {
        let now = Utc::now();
        let mut job = job(3, now);
        assert!(job.is_claimable(now));

        job.claim("p1", now);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.claimed_by.as_deref(), Some("p1"));
        assert!(!job.is_claimable(now));

        job.complete(now);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_at, Some(now));
        assert!(job.claimed_by.is_none());
    }

    #[test]
    fn complete_is_idempotent() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let mut job = job(3, t0);
        job.claim("p1", t0);
        job.complete(t0);
        job.complete(t1);
        assert_eq!(job.processed_at, Some(t0));
    }

    #[test]
    fn failure_schedules_retry_then_retires() {
        let now = Utc::now();
        let mut job = job(2, now);

        job.claim("p1", now);
        let outcome = job.fail("boom", Duration::from_secs(5), now);
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                available_at: now + chrono::Duration::seconds(5)
            }
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + chrono::Duration::seconds(5)));

        let later = now + chrono::Duration::seconds(5);
        job.claim("p1", later);
        let outcome = job.fail("boom again", Duration::from_secs(10), later);
        assert_eq!(outcome, FailOutcome::Failed);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("boom again"));
        assert!(!job.is_claimable(later + chrono::Duration::days(1)));
    }

    #[test]
    fn available_at_never_moves_backwards() {
        let now = Utc::now();
        let mut job = job(5, now);
        job.available_at = now + chrono::Duration::seconds(60);
        job.claim("p1", now);
        job.fail("boom", Duration::from_secs(1), now);
        assert_eq!(job.available_at, now + chrono::Duration::seconds(60));
    }

    #[test]
    fn skip_completes_with_reason() {
        let now = Utc::now();
        let mut job = job(3, now);
        job.claim("p1", now);
        job.skip("streak in progress", now);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.skip_reason.as_deref(), Some("streak in progress"));
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn release_stuck_respects_attempt_budget() {
        let now = Utc::now();
        let mut retryable = job(3, now);
        retryable.claim("p1", now);
        assert_eq!(retryable.release_stuck(now), JobStatus::Pending);
        assert!(retryable.is_claimable(now));

        let mut exhausted = job(1, now);
        exhausted.claim("p1", now);
        assert_eq!(exhausted.release_stuck(now), JobStatus::Failed);
    }

    #[test]
    fn claim_order_prefers_priority_then_availability() {
        let now = Utc::now();
        let mut low = job(3, now);
        low.priority = 5;
        let mut high = job(3, now);
        high.priority = 100;
        let mut high_later = job(3, now);
        high_later.priority = 100;
        high_later.available_at = now + chrono::Duration::seconds(1);

        let mut jobs = vec![low.clone(), high_later.clone(), high.clone()];
        jobs.sort_by(Job::claim_order);
        assert_eq!(jobs[0].id, high.id);
        assert_eq!(jobs[1].id, high_later.id);
        assert_eq!(jobs[2].id, low.id);
    }

    #[test]
    fn guarded_transitions_refuse_terminal_jobs() {
        let now = Utc::now();
        let mut job = job(1, now);
        job.claim("p1", now);
        job.try_fail("p1", "boom", Duration::ZERO, now).unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        assert!(matches!(
            job.try_complete("p1", now),
            Err(StoreError::InvalidTransition { operation: "complete", .. })
        ));
        assert!(job.try_skip("p1", "late", now).is_err());
        assert!(job.try_fail("p1", "again", Duration::ZERO, now).is_err());
        job.try_fail_permanently("p1", "again", now).unwrap();
        assert_eq!(job.last_error.as_deref(), Some("boom"));

        job.try_retry_manually(now).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.try_retry_manually(now).is_err());
    }

    #[test]
    fn outcome_writes_require_the_current_claim() {
        let now = Utc::now();
        let mut job = job(3, now);

        // Not claimed yet.
        assert!(matches!(
            job.try_complete("p1", now),
            Err(StoreError::NotOwner { claimed_by: None, .. })
        ));

        job.claim("p1", now);
        job.release_stuck(now);
        job.claim("p2", now);

        let before = job.clone();
        assert!(matches!(
            job.try_fail("p1", "stale", Duration::ZERO, now),
            Err(StoreError::NotOwner { ref owner, ref claimed_by, .. })
                if owner == "p1" && claimed_by.as_deref() == Some("p2")
        ));
        assert!(job.try_skip("p1", "stale", now).is_err());
        assert!(job.try_fail_permanently("p1", "stale", now).is_err());
        assert!(job.try_complete("p1", now).is_err());
        assert_eq!(job, before);

        job.try_complete("p2", now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        // A late duplicate completion stays a no-op.
        job.try_complete("p1", now).unwrap();
    }

    #[test]
    fn huge_retry_delay_saturates() {
        let now = Utc::now();
        let mut job = job(3, now);
        job.claim("p1", now);
        let outcome = job.fail("boom", Duration::from_secs(u64::MAX), now);
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                available_at: DateTime::<Utc>::MAX_UTC
            }
        );
        assert!(!job.is_claimable(now + chrono::Duration::days(365 * 100)));
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        let job = Job::from_new(
            NewJob::new("chat", json!({}), 1).with_max_attempts(0),
            Utc::now(),
        );
        assert_eq!(job.max_attempts, 1);
    }
}
