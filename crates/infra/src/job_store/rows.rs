//! Row types for `queue_jobs` and `queue_processing_log`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use livequeue_core::{Job, JobId, JobStatus, LogStatus, ProcessingLog, StoreError};

/// Columns selected wherever a full job row is read back.
pub(crate) const JOB_COLUMNS: &str = "id, event_type, payload, priority, status, attempts, \
     max_attempts, available_at, processed_at, consumer_id, claimed_by, last_error, \
     skip_reason, created_at, updated_at";

pub(crate) const LOG_COLUMNS: &str =
    "job_id, event_type, payload, status, error_message, attempt, terminal, duration_ms, processed_at";

#[derive(Debug)]
pub(crate) struct JobRow {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub consumer_id: Option<String>,
    pub claimed_by: Option<String>,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            available_at: row.try_get("available_at")?,
            processed_at: row.try_get("processed_at")?,
            consumer_id: row.try_get("consumer_id")?,
            claimed_by: row.try_get("claimed_by")?,
            last_error: row.try_get("last_error")?,
            skip_reason: row.try_get("skip_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {e}", row.id)))?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            event_type: row.event_type,
            payload: row.payload,
            priority: row.priority,
            status,
            attempts: non_negative(row.id, "attempts", row.attempts)?,
            max_attempts: non_negative(row.id, "max_attempts", row.max_attempts)?,
            available_at: row.available_at,
            processed_at: row.processed_at,
            consumer_id: row.consumer_id,
            claimed_by: row.claimed_by,
            last_error: row.last_error,
            skip_reason: row.skip_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
pub(crate) struct LogRow {
    pub job_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub error_message: Option<String>,
    pub attempt: i32,
    pub terminal: bool,
    pub duration_ms: i64,
    pub processed_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for LogRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LogRow {
            job_id: row.try_get("job_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            attempt: row.try_get("attempt")?,
            terminal: row.try_get("terminal")?,
            duration_ms: row.try_get("duration_ms")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

impl TryFrom<LogRow> for ProcessingLog {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let status: LogStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("log for job {}: {e}", row.job_id)))?;
        Ok(ProcessingLog {
            job_id: JobId::from_uuid(row.job_id),
            event_type: row.event_type,
            payload: row.payload,
            status,
            error_message: row.error_message,
            attempt: non_negative(row.job_id, "attempt", row.attempt)?,
            terminal: row.terminal,
            duration_ms: u64::try_from(row.duration_ms).unwrap_or(0),
            processed_at: row.processed_at,
        })
    }
}

fn non_negative(id: Uuid, column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("job {id}: negative {column} ({value})")))
}

/// Clamp a count into the `int` columns.
pub(crate) fn to_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn to_db_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_row(status: &str, attempts: i32) -> JobRow {
        let now = Utc::now();
        JobRow {
            id: Uuid::now_v7(),
            event_type: "gift".to_string(),
            payload: json!({"giftName": "Rose", "diamondCount": 1}),
            priority: 100,
            status: status.to_string(),
            attempts,
            max_attempts: 3,
            available_at: now,
            processed_at: None,
            consumer_id: Some("tts".to_string()),
            claimed_by: Some("processor-0".to_string()),
            last_error: None,
            skip_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn job_row_converts() {
        let row = job_row("processing", 1);
        let id = row.id;
        let job = Job::try_from(row).unwrap();
        assert_eq!(job.id, JobId::from_uuid(id));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.claimed_by.as_deref(), Some("processor-0"));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let err = Job::try_from(job_row("running", 0)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("running")));
    }

    #[test]
    fn negative_attempts_are_corrupt() {
        assert!(matches!(
            Job::try_from(job_row("pending", -1)),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn log_row_converts() {
        let row = LogRow {
            job_id: Uuid::now_v7(),
            event_type: "chat".to_string(),
            payload: json!({"comment": "hi"}),
            status: "skipped".to_string(),
            error_message: Some("gift streak still in progress".to_string()),
            attempt: 1,
            terminal: false,
            duration_ms: 12,
            processed_at: Utc::now(),
        };
        let log = ProcessingLog::try_from(row).unwrap();
        assert_eq!(log.status, LogStatus::Skipped);
        assert_eq!(log.duration_ms, 12);
    }

    #[test]
    fn integer_columns_saturate() {
        assert_eq!(to_db_int(u32::MAX), i32::MAX);
        assert_eq!(to_db_int(3), 3);
        assert_eq!(to_db_bigint(u64::MAX), i64::MAX);
    }
}
