//! Engine-level error type.

use thiserror::Error;

use livequeue_core::{ProfileError, StoreError};

use crate::admission::RejectReason;

/// Errors surfaced synchronously to producers and operators.
///
/// Per-job processing failures never appear here; the processor loop turns
/// them into store transitions and log records.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Admission refused the event under load. Not retried by the engine.
    #[error("queue full: {event_type} (priority {priority}) rejected: {reason}")]
    QueueFull {
        event_type: String,
        priority: i32,
        reason: RejectReason,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl QueueError {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. })
    }
}
