//! Capacity limit with gift-protecting eviction.
//!
//! Under the limit everything is accepted. At or over it:
//!
//! - gift-like events evict a batch of the oldest pending, non-gift jobs
//!   below the reservation threshold and are then always accepted
//! - other events below the load threshold are rejected
//! - other events at or above it evict exactly one job, the oldest pending
//!   non-gift job below the reservation threshold, whatever its priority
//!   relative to the incoming event
//!
//! The one case that refuses an event at or above the load threshold is a
//! full queue with nothing evictable: every pending job is gift-like or at or
//! above the reservation threshold, or every active job is processing.
//! Admitting anyway would let the queue grow past its limit without bound.

use std::fmt;

use tracing::{debug, warn};

use livequeue_core::StoreError;

use crate::config::QueueConfig;
use crate::store::JobStore;

/// Why an event was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BelowMinimumPriority { priority: i32, minimum: i32 },
    /// Full, and no pending non-gift job sits below the reservation threshold.
    NoEvictableJob,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BelowMinimumPriority { priority, minimum } => {
                write!(f, "priority {priority} is below the minimum {minimum} under load")
            }
            RejectReason::NoEvictableJob => f.write_str("no evictable pending job"),
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { evicted: usize },
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionController {
    max_queue_size: usize,
    eviction_fraction: f64,
    gift_reservation_priority: i32,
    min_priority_under_load: i32,
    gift_event_types: Vec<String>,
}

impl AdmissionController {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            eviction_fraction: config.eviction_fraction,
            gift_reservation_priority: config.gift_reservation_priority,
            min_priority_under_load: config.min_priority_under_load,
            gift_event_types: config.gift_event_types.clone(),
        }
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Jobs evicted to admit one gift-like event: `ceil(max * fraction)`, at least 1.
    pub fn gift_eviction_batch(&self) -> usize {
        let batch = (self.max_queue_size as f64 * self.eviction_fraction).ceil() as usize;
        batch.max(1)
    }

    /// Decide whether an event may be inserted, evicting from `store` as needed.
    ///
    /// Not atomic with the following insert; callers serialize enqueues.
    /// [`crate::QueueManager`] does so with a lock that only covers its own
    /// process, so managers in separate processes sharing one store can
    /// briefly overshoot `max_queue_size`.
    pub fn admit<S>(
        &self,
        store: &S,
        event_type: &str,
        priority: i32,
        gift_like: bool,
    ) -> Result<Admission, StoreError>
    where
        S: JobStore + ?Sized,
    {
        let active = store.status_counts()?.active();
        if active < self.max_queue_size {
            return Ok(Admission::Accepted { evicted: 0 });
        }

        if gift_like {
            let wanted = self.gift_eviction_batch();
            let evicted = store.evict_pending(
                wanted,
                self.gift_reservation_priority,
                &self.gift_event_types,
            )?;
            if evicted < wanted {
                debug!(event_type, wanted, evicted, "fewer jobs evictable than the gift batch");
            }
            warn!(event_type, priority, active, evicted, "queue full; evicted for gift event");
            return Ok(Admission::Accepted { evicted });
        }

        if priority < self.min_priority_under_load {
            return Ok(Admission::Rejected(RejectReason::BelowMinimumPriority {
                priority,
                minimum: self.min_priority_under_load,
            }));
        }

        let evicted =
            store.evict_pending(1, self.gift_reservation_priority, &self.gift_event_types)?;
        if evicted == 0 {
            return Ok(Admission::Rejected(RejectReason::NoEvictableJob));
        }
        warn!(event_type, priority, active, evicted, "queue full; evicted one job");
        Ok(Admission::Accepted { evicted })
    }
}
