//! Append-only processing log records.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;
use crate::id::JobId;

/// Outcome recorded for one processed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
    Skipped,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
            LogStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for LogStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            "skipped" => Ok(LogStatus::Skipped),
            other => Err(ParseError::UnknownLogStatus(other.to_string())),
        }
    }
}

/// One row of the processing log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub job_id: JobId,
    pub event_type: String,
    pub payload: Value,
    pub status: LogStatus,
    /// Handler error for failures, skip reason for skips.
    pub error_message: Option<String>,
    pub attempt: u32,
    /// The failure retired the job.
    pub terminal: bool,
    pub duration_ms: u64,
    pub processed_at: DateTime<Utc>,
}

impl ProcessingLog {
    pub fn success(
        job_id: JobId,
        event_type: &str,
        payload: Value,
        attempt: u32,
        duration_ms: u64,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            event_type: event_type.to_string(),
            payload,
            status: LogStatus::Success,
            error_message: None,
            attempt,
            terminal: false,
            duration_ms,
            processed_at,
        }
    }

    pub fn skipped(
        job_id: JobId,
        event_type: &str,
        payload: Value,
        reason: &str,
        attempt: u32,
        duration_ms: u64,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            event_type: event_type.to_string(),
            payload,
            status: LogStatus::Skipped,
            error_message: Some(reason.to_string()),
            attempt,
            terminal: false,
            duration_ms,
            processed_at,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn failed(
        job_id: JobId,
        event_type: &str,
        payload: Value,
        error: &str,
        attempt: u32,
        terminal: bool,
        duration_ms: u64,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            event_type: event_type.to_string(),
            payload,
            status: LogStatus::Failed,
            error_message: Some(error.to_string()),
            attempt,
            terminal,
            duration_ms,
            processed_at,
        }
    }
}

/// Outcome counts over a window of the processing log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSummary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl LogSummary {
    pub fn record(&mut self, status: LogStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: LogStatus, n: usize) {
        match status {
            LogStatus::Success => self.success += n,
            LogStatus::Skipped => self.skipped += n,
            LogStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }

    /// Percentage of non-failed outcomes; 100 when nothing was processed.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (self.success + self.skipped) as f64 * 100.0 / total as f64
    }
}
