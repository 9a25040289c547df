//! `livequeue-core`: data model for the live event queue.
//!
//! This crate contains **pure** types (no IO, no threads): persisted job rows
//! and their state machine, retry policy, processing log records and helpers
//! for reading gift payloads. Storage and scheduling live in other crates.

pub mod error;
pub mod gift;
pub mod id;
pub mod job;
pub mod log;
pub mod retry;

pub use error::{ParseError, ProfileError, StoreError};
pub use gift::{GiftInfo, is_unfinished_streak};
pub use id::JobId;
pub use job::{FailOutcome, Job, JobStatus, NewJob, StatusCounts};
pub use log::{LogStatus, LogSummary, ProcessingLog};
pub use retry::RetryPolicy;
