// crates/server/src/jobs/broadcast.rs
//! Per-job progress feed.
//!
//! A read-only projection over the store: every tick the subscriber gets the
//! job's current snapshot, independent of how often the worker writes.

use std::time::Duration;

use ferry_core::{JobId, JobSnapshot};
use ferry_db::Database;
use tokio_stream::Stream;

use super::JobError;

/// One item of a job's feed.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    /// The job is still pending or running.
    Progress(JobSnapshot),
    /// Final snapshot; the feed ends after this.
    Done(JobSnapshot),
    /// The job was purged while subscribed; the feed ends after this.
    Gone(JobId),
    /// The store could not be read; the feed ends after this.
    Unavailable(JobId),
}

#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    db: Database,
    interval: Duration,
}

impl ProgressBroadcaster {
    pub fn new(db: Database, interval: Duration) -> Self {
        Self { db, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Feed of snapshots for `id`, one per interval, until the job is
    /// terminal. Fails only if the job does not exist at subscribe time.
    pub async fn subscribe(
        &self,
        id: JobId,
    ) -> Result<impl Stream<Item = BroadcastEvent> + Send + 'static, JobError> {
        let first = self.db.get_job(id).await?.ok_or(JobError::NotFound(id))?;
        let db = self.db.clone();
        let interval = self.interval;

        Ok(async_stream::stream! {
            let mut current = Some(first);
            loop {
                match current.take() {
                    Some(job) if job.is_finished() => {
                        yield BroadcastEvent::Done(job.snapshot());
                        break;
                    }
                    Some(job) => yield BroadcastEvent::Progress(job.snapshot()),
                    None => {
                        yield BroadcastEvent::Gone(id);
                        break;
                    }
                }

                tokio::time::sleep(interval).await;
                current = match db.get_job(id).await {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::warn!(job_id = id, error = %e, "progress feed read failed");
                        yield BroadcastEvent::Unavailable(id);
                        break;
                    }
                };
            }
        })
    }
}
