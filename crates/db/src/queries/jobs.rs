//! Job record CRUD.
//!
//! Every mutation is a single statement guarded by the status it expects to
//! find, so a stale writer can never move a job backwards along the
//! lifecycle. The guard result is returned as `bool` (`true` = row changed).

use chrono::{DateTime, Utc};
use ferry_core::{Job, JobId, JobStatus, Operation, TransferProgress};

use super::row_types::{datetime_to_millis, JobRow, JOB_COLUMNS};
use crate::{Database, DbResult};

pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const MAX_LIST_LIMIT: u32 = 500;

/// Fields supplied when a job is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub operation: Operation,
    pub source: String,
    pub destination: String,
}

impl NewJob {
    pub fn new(operation: Operation, source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            operation,
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Parameters for [`Database::list_jobs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

/// Periodic snapshot written by a running job's worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub transfer: Option<TransferProgress>,
    pub live_text: String,
}

/// Final state written once a job's process has exited.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub progress: u8,
    pub transfer: Option<TransferProgress>,
    pub live_text: String,
    pub log_text: String,
    pub error_text: Option<String>,
    pub exit_status: i32,
    pub download_token: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl Database {
    /// Insert a new `pending` job and return its id.
    pub async fn insert_job(&self, job: &NewJob) -> DbResult<JobId> {
        let now = datetime_to_millis(Utc::now());
        let result = sqlx::query(
            r#"INSERT INTO jobs (operation, source, destination, status, created_at)
               VALUES (?, ?, ?, 'pending', ?)"#,
        )
        .bind(job.operation.as_str())
        .bind(&job.source)
        .bind(&job.destination)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_job(&self, id: JobId) -> DbResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Newest first.
    pub async fn list_jobs(&self, filter: &JobFilter) -> DbResult<Vec<Job>> {
        let limit = i64::from(filter.effective_limit());
        let offset = i64::from(filter.offset.unwrap_or(0));

        let rows: Vec<JobRow> = match filter.status {
            Some(status) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY id DESC LIMIT ? OFFSET ?"
                );
                sqlx::query_as(&sql)
                    .bind(status.as_str())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id DESC LIMIT ? OFFSET ?");
                sqlx::query_as(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Count jobs, optionally restricted to one status.
    pub async fn count_jobs(&self, status: Option<JobStatus>) -> DbResult<i64> {
        let row: (i64,) = match status {
            Some(status) => {
                sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(self.pool())
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM jobs")
                    .fetch_one(self.pool())
                    .await?
            }
        };
        Ok(row.0)
    }

    /// `pending -> running`.
    pub async fn mark_job_running(&self, id: JobId) -> DbResult<bool> {
        let now = datetime_to_millis(Utc::now());
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Write a progress snapshot for a running job. Stored progress only
    /// ever moves up.
    pub async fn update_job_progress(&self, id: JobId, update: &ProgressUpdate) -> DbResult<bool> {
        let transfer = update.transfer.as_ref();
        let result = sqlx::query(
            r#"UPDATE jobs SET
                 progress = MAX(progress, ?),
                 transferred_bytes = COALESCE(?, transferred_bytes),
                 total_bytes = COALESCE(?, total_bytes),
                 speed = CASE WHEN ? THEN ? ELSE speed END,
                 eta = CASE WHEN ? THEN ? ELSE eta END,
                 live_text = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(i64::from(update.progress))
        .bind(transfer.map(|t| t.transferred_bytes as i64))
        .bind(transfer.map(|t| t.total_bytes as i64))
        .bind(transfer.is_some())
        .bind(transfer.and_then(|t| t.speed.clone()))
        .bind(transfer.is_some())
        .bind(transfer.and_then(|t| t.eta.clone()))
        .bind(&update.live_text)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the terminal state of a job that was `pending` or `running`.
    pub async fn finish_job(&self, id: JobId, outcome: &JobOutcome) -> DbResult<bool> {
        let transfer = outcome.transfer.as_ref();
        let result = sqlx::query(
            r#"UPDATE jobs SET
                 status = ?,
                 progress = MAX(progress, ?),
                 transferred_bytes = COALESCE(?, transferred_bytes),
                 total_bytes = COALESCE(?, total_bytes),
                 speed = CASE WHEN ? THEN ? ELSE speed END,
                 eta = CASE WHEN ? THEN ? ELSE eta END,
                 live_text = ?,
                 log_text = ?,
                 error_text = ?,
                 exit_status = ?,
                 download_token = ?,
                 finished_at = ?
               WHERE id = ? AND status IN ('pending', 'running')"#,
        )
        .bind(outcome.status.as_str())
        .bind(i64::from(outcome.progress))
        .bind(transfer.map(|t| t.transferred_bytes as i64))
        .bind(transfer.map(|t| t.total_bytes as i64))
        .bind(transfer.is_some())
        .bind(transfer.and_then(|t| t.speed.clone()))
        .bind(transfer.is_some())
        .bind(transfer.and_then(|t| t.eta.clone()))
        .bind(&outcome.live_text)
        .bind(&outcome.log_text)
        .bind(&outcome.error_text)
        .bind(outcome.exit_status)
        .bind(&outcome.download_token)
        .bind(datetime_to_millis(outcome.finished_at))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Flip every `running` or `pending` row to `interrupted`. Only valid
    /// before any worker has been started in this process.
    pub async fn interrupt_orphaned_jobs(&self) -> DbResult<Vec<JobId>> {
        let now = datetime_to_millis(Utc::now());
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"UPDATE jobs SET status = 'interrupted', finished_at = ?
               WHERE status IN ('running', 'pending')
               RETURNING id"#,
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        let mut ids: Vec<JobId> = rows.into_iter().map(|(id,)| id).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// `interrupted | failed -> pending` for a new run under the same id.
    pub async fn reset_job_for_resume(&self, id: JobId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"UPDATE jobs SET
                 status = 'pending',
                 progress = 0,
                 transferred_bytes = NULL,
                 total_bytes = NULL,
                 speed = NULL,
                 eta = NULL,
                 live_text = '',
                 log_text = '',
                 error_text = NULL,
                 started_at = NULL,
                 finished_at = NULL,
                 exit_status = -1,
                 download_token = NULL,
                 attempt = attempt + 1
               WHERE id = ? AND status IN ('interrupted', 'failed')"#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Purge a terminal job.
    pub async fn delete_job(&self, id: JobId) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = ? AND status NOT IN ('pending', 'running')",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop the token from a job once it has been redeemed or expired.
    pub async fn clear_download_token(&self, id: JobId, token: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET download_token = NULL WHERE id = ? AND download_token = ?",
        )
        .bind(id)
        .bind(token)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop every token still recorded on a row. Tokens only resolve in the
    /// process that minted them, so after a restart none of these can be
    /// redeemed.
    pub async fn clear_all_download_tokens(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET download_token = NULL WHERE download_token IS NOT NULL",
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn test_filter_limit_defaults_and_clamps() {
        assert_eq!(JobFilter::default().effective_limit(), 50);
        let big = JobFilter {
            limit: Some(10_000),
            ..JobFilter::default()
        };
        assert_eq!(big.effective_limit(), 500);
        let zero = JobFilter {
            limit: Some(0),
            ..JobFilter::default()
        };
        assert_eq!(zero.effective_limit(), 1);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .insert_job(&NewJob::new(Operation::Copy, "remote:a", "/tmp/b"))
            .await
            .unwrap();

        let job = db.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.operation, Operation::Copy);
        assert_eq!(job.source, "remote:a");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.exit_status, -1);
        assert_eq!(job.attempt, 1);
        assert!(job.transfer.is_none());
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(db.get_job(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_status_is_reported() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .insert_job(&NewJob::new(Operation::Sync, "a", "b"))
            .await
            .unwrap();
        sqlx::query("UPDATE jobs SET status = 'exploded' WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.get_job(id).await.unwrap_err();
        assert!(matches!(err, crate::DbError::CorruptRow { id: bad, .. } if bad == id));
    }
}
