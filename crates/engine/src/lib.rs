//! Event queue engine: priority resolution, admission control, the claim
//! protocol and the worker loop.
//!
//! ## Flow
//!
//! ```text
//! producer → QueueManager::enqueue → PriorityResolver → AdmissionController
//!          → JobStore::insert → Notifier::signal
//!          → JobProcessor loop → JobStore::claim_next → handler
//!          → JobStore::mark_* → ProcessingLog
//! ```
//!
//! ## Components
//!
//! - `PriorityResolver`: pure (event type, consumer, payload) → priority
//! - `AdmissionController`: capacity limit with gift-protecting eviction
//! - `JobStore`: persistence + the atomic conditional claim
//! - `QueueManager`: enqueue, status, health, maintenance, wake fan-out
//! - `JobProcessor`: single-job-in-flight worker loop with graceful drain
//! - `Notifier`: idle wake-up with a bounded timeout fallback

pub mod admission;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod notify;
pub mod priority;
pub mod processor;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use admission::{Admission, AdmissionController, RejectReason};
pub use config::{ConfigError, ProcessorConfig, QueueConfig};
pub use dispatch::{
    ActiveService, HandlerResult, HandlerSet, ServiceSlot, WILDCARD, streak_final_only,
};
pub use error::QueueError;
pub use manager::{EnqueueOptions, HealthLevel, HealthStatus, QueueManager, QueueStatus};
pub use notify::{Notifier, WakeReason};
pub use priority::{
    CostRange, GiftEventTypes, GiftOverridesSpec, PriorityProfileSpec, PriorityResolver,
    PriorityTable, ServicePriorityProfile,
};
pub use processor::{
    JobOutcome, JobProcessor, ProcessorHandle, ProcessorState, ProcessorStats, ShutdownReport,
};
pub use store::{InMemoryJobStore, JobStore};
