// crates/db/src/queries/row_types.rs
// Raw `jobs` row and its conversion into the core `Job` model.

use chrono::{DateTime, Utc};
use ferry_core::{Job, JobId, JobStatus, Operation, TransferProgress};
use sqlx::Row;

use crate::{DbError, DbResult};

/// Column list matching [`JobRow`]'s `FromRow` impl.
pub(crate) const JOB_COLUMNS: &str = "id, operation, source, destination, status, progress, \
     transferred_bytes, total_bytes, speed, eta, live_text, log_text, error_text, \
     created_at, started_at, finished_at, exit_status, download_token, attempt";

#[derive(Debug)]
pub(crate) struct JobRow {
    id: i64,
    operation: String,
    source: String,
    destination: String,
    status: String,
    progress: i64,
    transferred_bytes: Option<i64>,
    total_bytes: Option<i64>,
    speed: Option<String>,
    eta: Option<String>,
    live_text: String,
    log_text: String,
    error_text: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    exit_status: i64,
    download_token: Option<String>,
    attempt: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            operation: row.try_get("operation")?,
            source: row.try_get("source")?,
            destination: row.try_get("destination")?,
            status: row.try_get("status")?,
            progress: row.try_get("progress")?,
            transferred_bytes: row.try_get("transferred_bytes")?,
            total_bytes: row.try_get("total_bytes")?,
            speed: row.try_get("speed")?,
            eta: row.try_get("eta")?,
            live_text: row.try_get("live_text")?,
            log_text: row.try_get("log_text")?,
            error_text: row.try_get("error_text")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            exit_status: row.try_get("exit_status")?,
            download_token: row.try_get("download_token")?,
            attempt: row.try_get("attempt")?,
        })
    }
}

impl JobRow {
    pub(crate) fn into_job(self) -> DbResult<Job> {
        let id = self.id;
        let corrupt = |message: String| DbError::CorruptRow { id, message };

        let operation: Operation = self.operation.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status: JobStatus = self.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let created_at = millis_to_datetime(self.created_at)
            .ok_or_else(|| corrupt(format!("bad created_at {}", self.created_at)))?;

        // Byte counters are written together; either both are present or the
        // job has not produced a stats line yet.
        let transfer = match (self.transferred_bytes, self.total_bytes) {
            (Some(done), Some(total)) => Some(TransferProgress {
                percent: clamp_percent(self.progress),
                transferred_bytes: done.max(0) as u64,
                total_bytes: total.max(0) as u64,
                speed: self.speed,
                eta: self.eta,
            }),
            _ => None,
        };

        Ok(Job {
            id,
            operation,
            source: self.source,
            destination: self.destination,
            status,
            progress: clamp_percent(self.progress),
            transfer,
            live_text: self.live_text,
            log_text: self.log_text,
            error_text: self.error_text,
            created_at,
            started_at: self.started_at.and_then(millis_to_datetime),
            finished_at: self.finished_at.and_then(millis_to_datetime),
            exit_status: self.exit_status as i32,
            download_token: self.download_token,
            attempt: self.attempt.clamp(1, u32::MAX as i64) as u32,
        })
    }
}

pub(crate) fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub(crate) fn datetime_to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}
