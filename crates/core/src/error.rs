//! Error model shared by the queue crates.

use thiserror::Error;

use crate::id::JobId;

/// Job store operation error.
///
/// These are **infrastructure errors**. Per-job handler failures are not
/// errors at this level; they are recorded as state transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job exists but its status does not allow the operation.
    #[error("job {id}: cannot {operation} from status {status}")]
    InvalidTransition {
        id: JobId,
        status: String,
        operation: &'static str,
    },

    /// The caller's claim on the job is gone: it was reset as stuck or
    /// claimed by another processor.
    #[error("job {id}: not owned by {owner} (claimed by {claimed_by:?})")]
    NotOwner {
        id: JobId,
        owner: String,
        claimed_by: Option<String>,
    },

    /// The backing store could not be reached or rejected the query.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An in-process lock was poisoned by a panicking thread.
    #[error("store lock poisoned")]
    Poisoned,

    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Invalid priority profile, rejected at registration time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("invalid cost range: min {min} is greater than max {max}")]
    InvalidCostRange { min: i64, max: i64 },

    #[error("gift name override must not be empty")]
    EmptyGiftName,

    #[error("gift id override must not be empty")]
    EmptyGiftId,
}

/// Failure to parse a persisted or user-supplied value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown job status: {0}")]
    UnknownStatus(String),

    #[error("unknown log status: {0}")]
    UnknownLogStatus(String),
}
