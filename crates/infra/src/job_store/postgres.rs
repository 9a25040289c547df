//! Postgres-backed job store.
//!
//! Jobs live in `queue_jobs`, processing records in `queue_processing_log`.
//! Schema management is left to the host application; the expected columns
//! are listed in [`super::rows`].
//!
//! ## Claiming
//!
//! `next_candidate` is a plain ordered `SELECT`. `try_claim` is a single
//! conditional `UPDATE ... WHERE status = 'pending' AND ...`: when a
//! concurrent processor got there first the update matches zero rows and the
//! claim reports a lost race. No advisory locks are taken.
//!
//! ## Other transitions
//!
//! Completion, failure, dead-lettering and manual retry lock the row
//! (`SELECT ... FOR UPDATE`), apply the guarded transition from
//! `livequeue_core::Job` and write the row back in the same transaction, so
//! both stores share one state machine. Outcome writes check `claimed_by`
//! against the caller under that row lock: a processor whose job was reset
//! and re-claimed gets `StoreError::NotOwner` and the transaction rolls back.
//!
//! ## Error mapping
//!
//! | SQLx error | `StoreError` |
//! |------------|--------------|
//! | `Database` with SQLSTATE class `22` (data exception) | `Corrupt` |
//! | `ColumnDecode` / `Decode` | `Corrupt` |
//! | any other `Database` error | `Unavailable` |
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` and the rest | `Unavailable` |
//!
//! ## Sync access
//!
//! [`JobStore`] is synchronous. The trait impl drives the async methods on
//! the runtime handle captured at construction, so it must be called from a
//! plain thread (processor threads, `spawn_blocking`), never from inside an
//! async task.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use livequeue_core::job::STUCK_FINAL_ATTEMPT_ERROR;
use livequeue_core::{
    FailOutcome, Job, JobId, JobStatus, LogStatus, LogSummary, NewJob, ProcessingLog,
    StatusCounts, StoreError,
};
use livequeue_engine::JobStore;

use super::rows::{JOB_COLUMNS, JobRow, LOG_COLUMNS, LogRow, to_db_bigint, to_db_int};

/// Connections opened by [`PostgresJobStore::connect`].
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Durable job store over a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresJobStore {
    /// Wrap an existing pool. `runtime` drives the sync [`JobStore`] impl.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Open a pool against `database_url` on the current tokio runtime.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::Unavailable(
                "PostgresJobStore::connect must run inside a tokio runtime".to_string(),
            )
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        info!(max_connections = DEFAULT_MAX_CONNECTIONS, "connected job store to postgres");
        Ok(Self::new(pool, runtime))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    #[instrument(skip(self, job), fields(event_type = %job.event_type, priority = job.priority), err)]
    pub async fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let job = Job::from_new(job, now);
        let sql = format!(
            "INSERT INTO queue_jobs ({JOB_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        );
        bind_job(sqlx::query(&sql), &job)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(job)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(decode_job).transpose()
    }

    pub async fn next_candidate(&self, now: DateTime<Utc>) -> Result<Option<JobId>, StoreError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM queue_jobs
            WHERE status = 'pending' AND available_at <= $1 AND attempts < max_attempts
            ORDER BY priority DESC, available_at ASC, created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_candidate", e))?;
        Ok(id.map(JobId::from_uuid))
    }

    pub async fn try_claim(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            "UPDATE queue_jobs \
             SET status = 'processing', attempts = attempts + 1, claimed_by = $2, updated_at = $3 \
             WHERE id = $1 AND status = 'pending' AND available_at <= $3 AND attempts < max_attempts \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(owner)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("try_claim", e))?;
        if row.is_none() {
            debug!(job_id = %id, owner, "conditional claim matched no row");
        }
        row.as_ref().map(decode_job).transpose()
    }

    /// Lock one row, apply `f` to it and persist the result.
    ///
    /// An error from `f` rolls the transaction back untouched.
    async fn transition<T>(
        &self,
        id: JobId,
        operation: &'static str,
        f: impl FnOnce(&mut Job) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let mut job = lock_job(&mut tx, id, operation).await?;
        let out = f(&mut job)?;
        update_job(&mut tx, &job, operation).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(out)
    }

    pub async fn mark_completed(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(id, "mark_completed", |job| job.try_complete(owner, now))
            .await
    }

    pub async fn mark_skipped(
        &self,
        id: JobId,
        owner: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(id, "mark_skipped", |job| job.try_skip(owner, reason, now))
            .await
    }

    pub async fn mark_failed(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, StoreError> {
        self.transition(id, "mark_failed", |job| {
            job.try_fail(owner, error, retry_delay, now)
        })
        .await
    }

    pub async fn mark_dead(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition(id, "mark_dead", |job| {
            job.try_fail_permanently(owner, error, now)
        })
        .await
    }

    pub async fn retry_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.transition(id, "retry_failed", |job| {
            job.try_retry_manually(now)?;
            Ok(job.clone())
        })
        .await
    }

    pub async fn append_log(&self, record: ProcessingLog) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO queue_processing_log ({LOG_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&sql)
            .bind(record.job_id.as_uuid())
            .bind(&record.event_type)
            .bind(&record.payload)
            .bind(record.status.as_str())
            .bind(record.error_message.as_deref())
            .bind(to_db_int(record.attempt))
            .bind(record.terminal)
            .bind(to_db_bigint(record.duration_ms))
            .bind(record.processed_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("append_log", e))?;
        Ok(())
    }

    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<ProcessingLog>, StoreError> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM queue_processing_log ORDER BY processed_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("recent_logs", e))?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = LogRow::from_row(row)
                .map_err(|e| StoreError::Corrupt(format!("failed to decode log row: {e}")))?;
            logs.push(ProcessingLog::try_from(row)?);
        }
        Ok(logs)
    }

    pub async fn log_summary(&self, since: DateTime<Utc>) -> Result<LogSummary, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM queue_processing_log
            WHERE processed_at >= $1
            GROUP BY status
            "#,
        )
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("log_summary", e))?;

        let mut summary = LogSummary::default();
        for row in &rows {
            let (status, n) = read_group(row)?;
            let status: LogStatus = status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("log summary: {e}")))?;
            summary.add(status, n);
        }
        Ok(summary)
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM queue_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("status_counts", e))?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let (status, n) = read_group(row)?;
            let status: JobStatus = status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("status counts: {e}")))?;
            counts.add(status, n);
        }
        Ok(counts)
    }

    pub async fn active_event_type_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_type AS status, COUNT(*) AS n
            FROM queue_jobs
            WHERE status IN ('pending', 'processing')
            GROUP BY event_type
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("active_event_type_counts", e))?;

        rows.iter().map(read_group).collect()
    }

    #[instrument(skip(self, protected_event_types), err)]
    pub async fn evict_pending(
        &self,
        limit: usize,
        below_priority: i32,
        protected_event_types: &[String],
    ) -> Result<usize, StoreError> {
        if limit == 0 {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE id IN (
                SELECT id
                FROM queue_jobs
                WHERE status = 'pending'
                  AND priority < $2
                  AND NOT (event_type = ANY($3))
                ORDER BY created_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(below_priority)
        .bind(protected_event_types)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("evict_pending", e))?;
        Ok(affected(result.rows_affected()))
    }

    pub async fn clear_pending(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE status = 'pending'")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_pending", e))?;
        Ok(affected(result.rows_affected()))
    }

    pub async fn purge_terminal(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if !status.is_terminal() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE status = $1 AND COALESCE(processed_at, updated_at) < $2
            "#,
        )
        .bind(status.as_str())
        .bind(older_than)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_terminal", e))?;
        Ok(affected(result.rows_affected()))
    }

    /// Same rule as `Job::release_stuck`, applied in one statement.
    #[instrument(skip(self), err)]
    pub async fn reset_stuck(
        &self,
        updated_before: DateTime<Utc>,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                last_error = CASE WHEN attempts >= max_attempts THEN $4 ELSE last_error END,
                processed_at = CASE WHEN attempts >= max_attempts THEN $3 ELSE processed_at END,
                claimed_by = NULL,
                updated_at = $3
            WHERE status = 'processing'
              AND updated_at < $1
              AND ($2::text IS NULL OR claimed_by = $2)
            "#,
        )
        .bind(updated_before)
        .bind(owner)
        .bind(now)
        .bind(STUCK_FINAL_ATTEMPT_ERROR)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_stuck", e))?;
        Ok(affected(result.rows_affected()))
    }

    /// `VACUUM ANALYZE` both tables. Runs outside any transaction.
    pub async fn optimize(&self) -> Result<(), StoreError> {
        for table in ["queue_jobs", "queue_processing_log"] {
            let sql = format!("VACUUM ANALYZE {table}");
            sqlx::raw_sql(&sql)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("optimize", e))?;
        }
        info!("vacuumed job store tables");
        Ok(())
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

/// Bind every column of [`JOB_COLUMNS`] in order.
fn bind_job<'q>(query: PgQuery<'q>, job: &'q Job) -> PgQuery<'q> {
    query
        .bind(job.id.as_uuid())
        .bind(&job.event_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.status.as_str())
        .bind(to_db_int(job.attempts))
        .bind(to_db_int(job.max_attempts))
        .bind(job.available_at)
        .bind(job.processed_at)
        .bind(job.consumer_id.as_deref())
        .bind(job.claimed_by.as_deref())
        .bind(job.last_error.as_deref())
        .bind(job.skip_reason.as_deref())
        .bind(job.created_at)
        .bind(job.updated_at)
}

async fn lock_job(
    tx: &mut Transaction<'_, Postgres>,
    id: JobId,
    operation: &'static str,
) -> Result<Job, StoreError> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM queue_jobs WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    match row {
        Some(row) => decode_job(&row),
        None => Err(StoreError::NotFound(id)),
    }
}

async fn update_job(
    tx: &mut Transaction<'_, Postgres>,
    job: &Job,
    operation: &'static str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE queue_jobs
        SET status = $2,
            attempts = $3,
            available_at = $4,
            processed_at = $5,
            claimed_by = $6,
            last_error = $7,
            skip_reason = $8,
            updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(to_db_int(job.attempts))
    .bind(job.available_at)
    .bind(job.processed_at)
    .bind(job.claimed_by.as_deref())
    .bind(job.last_error.as_deref())
    .bind(job.skip_reason.as_deref())
    .bind(job.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

fn decode_job(row: &PgRow) -> Result<Job, StoreError> {
    let row = JobRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode job row: {e}")))?;
    Job::try_from(row)
}

/// Read a `(status, n)` pair from a `GROUP BY` row.
fn read_group(row: &PgRow) -> Result<(String, usize), StoreError> {
    let key: String = row
        .try_get("status")
        .map_err(|e| StoreError::Corrupt(format!("failed to read group key: {e}")))?;
    let n: i64 = row
        .try_get("n")
        .map_err(|e| StoreError::Corrupt(format!("failed to read group count: {e}")))?;
    Ok((key, usize::try_from(n).unwrap_or(0)))
}

fn affected(rows: u64) -> usize {
    usize::try_from(rows).unwrap_or(usize::MAX)
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                // Class 22: data exception (bad json, out-of-range values).
                Some(code) if code.starts_with("22") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            // fetch_optional/fetch_all never produce this
            StoreError::Unavailable(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

impl JobStore for PostgresJobStore {
    fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.block_on(PostgresJobStore::insert(self, job, now))
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.block_on(PostgresJobStore::get(self, id))
    }

    fn next_candidate(&self, now: DateTime<Utc>) -> Result<Option<JobId>, StoreError> {
        self.block_on(PostgresJobStore::next_candidate(self, now))
    }

    fn try_claim(
        &self,
        id: JobId,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        self.block_on(PostgresJobStore::try_claim(self, id, owner, now))
    }

    fn mark_completed(&self, id: JobId, owner: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.block_on(PostgresJobStore::mark_completed(self, id, owner, now))
    }

    fn mark_skipped(
        &self,
        id: JobId,
        owner: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.block_on(PostgresJobStore::mark_skipped(self, id, owner, reason, now))
    }

    fn mark_failed(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, StoreError> {
        self.block_on(PostgresJobStore::mark_failed(
            self,
            id,
            owner,
            error,
            retry_delay,
            now,
        ))
    }

    fn mark_dead(
        &self,
        id: JobId,
        owner: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.block_on(PostgresJobStore::mark_dead(self, id, owner, error, now))
    }

    fn append_log(&self, record: ProcessingLog) -> Result<(), StoreError> {
        self.block_on(PostgresJobStore::append_log(self, record))
    }

    fn recent_logs(&self, limit: usize) -> Result<Vec<ProcessingLog>, StoreError> {
        self.block_on(PostgresJobStore::recent_logs(self, limit))
    }

    fn log_summary(&self, since: DateTime<Utc>) -> Result<LogSummary, StoreError> {
        self.block_on(PostgresJobStore::log_summary(self, since))
    }

    fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.block_on(PostgresJobStore::status_counts(self))
    }

    fn active_event_type_counts(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        self.block_on(PostgresJobStore::active_event_type_counts(self))
    }

    fn evict_pending(
        &self,
        limit: usize,
        below_priority: i32,
        protected_event_types: &[String],
    ) -> Result<usize, StoreError> {
        self.block_on(PostgresJobStore::evict_pending(
            self,
            limit,
            below_priority,
            protected_event_types,
        ))
    }

    fn clear_pending(&self) -> Result<usize, StoreError> {
        self.block_on(PostgresJobStore::clear_pending(self))
    }

    fn purge_terminal(
        &self,
        status: JobStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.block_on(PostgresJobStore::purge_terminal(self, status, older_than))
    }

    fn reset_stuck(
        &self,
        updated_before: DateTime<Utc>,
        owner: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.block_on(PostgresJobStore::reset_stuck(self, updated_before, owner, now))
    }

    fn retry_failed(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.block_on(PostgresJobStore::retry_failed(self, id, now))
    }

    fn optimize(&self) -> Result<(), StoreError> {
        self.block_on(PostgresJobStore::optimize(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(matches!(
            map_sqlx_error("try_claim", sqlx::Error::PoolClosed),
            StoreError::Unavailable(msg) if msg.contains("try_claim")
        ));
        assert!(matches!(
            map_sqlx_error("insert", sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn decode_errors_are_corrupt() {
        let err = sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: "not text".into(),
        };
        assert!(matches!(map_sqlx_error("get", err), StoreError::Corrupt(_)));
    }

    #[test]
    fn row_not_found_is_not_mistaken_for_a_missing_job() {
        assert!(matches!(
            map_sqlx_error("get", sqlx::Error::RowNotFound),
            StoreError::Unavailable(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lazy_pool_reports_unreachable_database() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://livequeue@127.0.0.1:1/livequeue")
            .unwrap();
        let store = PostgresJobStore::new(pool, Handle::current());

        let err = store.status_counts().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn sync_calls_run_on_the_captured_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let pool = runtime.block_on(async {
            PgPoolOptions::new()
                .acquire_timeout(Duration::from_millis(200))
                .connect_lazy("postgres://livequeue@127.0.0.1:1/livequeue")
                .unwrap()
        });
        let store = Arc::new(PostgresJobStore::new(pool, runtime.handle().clone()));

        let from_thread = std::thread::spawn({
            let store = Arc::clone(&store);
            move || JobStore::next_candidate(&*store, Utc::now())
        })
        .join()
        .unwrap();
        assert!(matches!(from_thread, Err(StoreError::Unavailable(_))));
    }
}
