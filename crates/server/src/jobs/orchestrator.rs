// crates/server/src/jobs/orchestrator.rs
//! Job lifecycle owner.
//!
//! The store is the only durable truth. The orchestrator keeps just the
//! live-handle map (job id -> stop signal) needed to reach a running
//! process; losing it on restart is fine because `recover_on_start` turns
//! every orphaned row into `interrupted`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use ferry_core::{
    Archiver, FerryConfig, Job, JobId, Operation, PlanError, ProcessRunner, StopSignal,
    TransferCommand, TransferTool,
};
use ferry_db::{Database, JobFilter, NewJob};
use tokio::sync::Notify;

use super::hook::CompletionHook;
use super::{worker, JobError};
use crate::metrics;

/// Extra time allowed on shutdown beyond the stop grace period.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

/// Everything a worker needs to run one job.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tool: TransferTool,
    pub archiver: Archiver,
    pub grace: Duration,
    pub progress_flush: Duration,
    pub tail_bytes: usize,
    pub log_cap_bytes: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &FerryConfig) -> Self {
        Self {
            tool: TransferTool::from_config(&config.transfer),
            archiver: Archiver::from_config(&config.download.archiver),
            grace: config.transfer.grace(),
            progress_flush: config.transfer.progress_flush(),
            tail_bytes: config.transfer.tail_bytes,
            log_cap_bytes: config.transfer.log_cap_bytes,
        }
    }
}

/// Handle to a job with a live worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveJob {
    pub(crate) stop: StopSignal,
    /// Set by `cancel`. A stop without it came from shutdown.
    cancelled: Arc<AtomicBool>,
}

impl LiveJob {
    fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop.signal_stop()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn same_as(&self, other: &LiveJob) -> bool {
        self.stop.same_as(&other.stop)
    }
}

pub(crate) struct Shared {
    pub(crate) db: Database,
    pub(crate) runner: ProcessRunner,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) live: DashMap<JobId, LiveJob>,
    pub(crate) shutting_down: AtomicBool,
    /// Notified whenever the live map drains to empty.
    pub(crate) idle: Notify,
    hooks: RwLock<HashMap<Operation, Arc<dyn CompletionHook>>>,
}

impl Shared {
    pub(crate) fn hook_for(&self, operation: Operation) -> Option<Arc<dyn CompletionHook>> {
        match self.hooks.read() {
            Ok(hooks) => hooks.get(&operation).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading hooks: {e}");
                None
            }
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Turn a job's stored fields back into a command line.
    fn plan(
        &self,
        operation: Operation,
        source: &str,
        destination: &str,
    ) -> Result<TransferCommand, PlanError> {
        match operation {
            Operation::PrepareDownload => {
                let paths: Vec<String> = source.lines().map(str::to_string).collect();
                self.settings.archiver.command(Path::new(destination), &paths)
            }
            _ => self.settings.tool.command(operation, source, destination),
        }
    }
}

/// Cheap to clone; all clones drive the same set of jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    shared: Arc<Shared>,
}

impl JobOrchestrator {
    pub fn new(db: Database, settings: OrchestratorSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                db,
                runner: ProcessRunner::new(settings.grace),
                settings,
                live: DashMap::new(),
                shutting_down: AtomicBool::new(false),
                idle: Notify::new(),
                hooks: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn db(&self) -> &Database {
        &self.shared.db
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.shared.settings
    }

    pub fn register_hook(&self, operation: Operation, hook: Arc<dyn CompletionHook>) {
        match self.shared.hooks.write() {
            Ok(mut hooks) => {
                hooks.insert(operation, hook);
            }
            Err(e) => tracing::error!("RwLock poisoned writing hooks: {e}"),
        }
    }

    /// Must run once, before the first `submit`. Any row still `running`
    /// (or `pending`) has no process behind it and becomes `interrupted`.
    pub async fn recover_on_start(&self) -> Result<Vec<JobId>, JobError> {
        let ids = self.shared.db.interrupt_orphaned_jobs().await?;
        for id in &ids {
            tracing::warn!(job_id = id, "orphaned job marked interrupted");
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "restart recovery complete");
        }
        Ok(ids)
    }

    /// Create a transfer job and start it in the background.
    pub async fn submit(
        &self,
        operation: Operation,
        source: &str,
        destination: &str,
    ) -> Result<JobId, JobError> {
        if operation == Operation::PrepareDownload {
            return Err(PlanError::NotATransfer(operation.to_string()).into());
        }
        let command = self.shared.plan(operation, source, destination)?;
        self.enqueue(NewJob::new(operation, source, destination), command)
            .await
    }

    /// Create a prepare-download job that archives `paths` into `artifact`.
    pub async fn submit_archive(&self, paths: &[String], artifact: &Path) -> Result<JobId, JobError> {
        let command = self.shared.settings.archiver.command(artifact, paths)?;
        let job = NewJob::new(
            Operation::PrepareDownload,
            paths.join("\n"),
            artifact.display().to_string(),
        );
        self.enqueue(job, command).await
    }

    async fn enqueue(&self, job: NewJob, command: TransferCommand) -> Result<JobId, JobError> {
        if self.shared.is_shutting_down() {
            return Err(JobError::ShuttingDown);
        }
        let operation = job.operation;
        let id = self.shared.db.insert_job(&job).await?;
        metrics::record_job_submitted(operation);
        tracing::info!(job_id = id, %operation, "job submitted");
        self.spawn_worker(id, operation, command);
        Ok(id)
    }

    fn spawn_worker(&self, id: JobId, operation: Operation, command: TransferCommand) {
        let live = LiveJob::default();
        self.shared.live.insert(id, live.clone());
        metrics::job_activated();

        let handle = tokio::spawn(worker::run(
            Arc::clone(&self.shared),
            id,
            operation,
            command,
            live,
        ));

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(job_id = id, "job worker panicked");
                    worker::fail_after_panic(&shared, id, operation).await;
                }
            }
        });
    }

    /// Signal the job's process to stop. The transition to `cancelled`
    /// happens on the worker once the process has exited.
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let job = self.get(id).await?;
        if job.status.is_terminal() {
            return Err(JobError::transition(id, job.status, "stop"));
        }
        let live = self.shared.live.get(&id).map(|entry| entry.value().clone());
        match live {
            Some(live) => {
                if live.cancel() {
                    tracing::info!(job_id = id, "stop requested");
                }
                Ok(())
            }
            None => Err(JobError::transition(id, job.status, "stop")),
        }
    }

    /// Re-run an interrupted or failed job under its original id. The
    /// transfer tool's skip-existing behaviour makes the rerun incremental.
    pub async fn resume(&self, id: JobId) -> Result<JobId, JobError> {
        if self.shared.is_shutting_down() {
            return Err(JobError::ShuttingDown);
        }
        let job = self.get(id).await?;
        if !job.status.is_resumable() {
            return Err(JobError::transition(id, job.status, "resume"));
        }
        let command = self
            .shared
            .plan(job.operation, &job.source, &job.destination)?;

        if !self.shared.db.reset_job_for_resume(id).await? {
            // Lost a race with another resume or a purge.
            let status = self.get(id).await?.status;
            return Err(JobError::transition(id, status, "resume"));
        }
        metrics::record_job_submitted(job.operation);
        tracing::info!(job_id = id, attempt = job.attempt + 1, "job resumed");
        self.spawn_worker(id, job.operation, command);
        Ok(id)
    }

    pub async fn get(&self, id: JobId) -> Result<Job, JobError> {
        self.shared
            .db
            .get_job(id)
            .await?
            .ok_or(JobError::NotFound(id))
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        Ok(self.shared.db.list_jobs(filter).await?)
    }

    /// Purge a terminal job from the store.
    pub async fn delete(&self, id: JobId) -> Result<(), JobError> {
        let job = self.get(id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::transition(id, job.status, "delete"));
        }
        if !self.shared.db.delete_job(id).await? {
            let status = self.get(id).await?.status;
            return Err(JobError::transition(id, status, "delete"));
        }
        tracing::info!(job_id = id, "job purged");
        Ok(())
    }

    /// Number of jobs with a live worker.
    pub fn active_jobs(&self) -> usize {
        self.shared.live.len()
    }

    pub fn is_live(&self, id: JobId) -> bool {
        self.shared.live.contains_key(&id)
    }

    /// Stop every live process and wait for the workers to exit. Rows stay
    /// `running`; the next start's recovery marks them `interrupted`.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let mut signalled = 0usize;
        for entry in self.shared.live.iter() {
            entry.value().stop.signal_stop();
            signalled += 1;
        }
        if signalled > 0 {
            tracing::info!(jobs = signalled, "stopping live jobs for shutdown");
        }

        let drained = async {
            loop {
                let notified = self.shared.idle.notified();
                if self.shared.live.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        let limit = self.shared.settings.grace + SHUTDOWN_SLACK;
        if tokio::time::timeout(limit, drained).await.is_err() {
            tracing::warn!(
                remaining = self.shared.live.len(),
                "workers still running after shutdown deadline"
            );
        }
    }
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("live", &self.shared.live.len())
            .field("shutting_down", &self.shared.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings::from_config(&FerryConfig::default())
    }

    #[tokio::test]
    async fn test_submit_rejects_prepare_download() {
        let db = Database::new_in_memory().await.unwrap();
        let orchestrator = JobOrchestrator::new(db.clone(), settings());
        let err = orchestrator
            .submit(Operation::PrepareDownload, "/a", "/b")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Plan(PlanError::NotATransfer(_))));
        assert_eq!(db.count_jobs(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_flag_like_source_without_creating_row() {
        let db = Database::new_in_memory().await.unwrap();
        let orchestrator = JobOrchestrator::new(db.clone(), settings());
        let err = orchestrator
            .submit(Operation::Sync, "--delete-excluded", "/b")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Plan(PlanError::InvalidLocation { .. })));
        assert_eq!(db.count_jobs(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let db = Database::new_in_memory().await.unwrap();
        let orchestrator = JobOrchestrator::new(db, settings());
        assert!(matches!(orchestrator.get(77).await, Err(JobError::NotFound(77))));
        assert!(matches!(orchestrator.cancel(77).await, Err(JobError::NotFound(77))));
        assert!(matches!(orchestrator.resume(77).await, Err(JobError::NotFound(77))));
        assert!(matches!(orchestrator.delete(77).await, Err(JobError::NotFound(77))));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_refused() {
        let db = Database::new_in_memory().await.unwrap();
        let orchestrator = JobOrchestrator::new(db, settings());
        orchestrator.shutdown().await;
        let err = orchestrator
            .submit(Operation::Copy, "/a", "/b")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_archive_plan_splits_source_lines() {
        let db = Database::new_in_memory().await.unwrap();
        let orchestrator = JobOrchestrator::new(db, settings());
        let cmd = orchestrator
            .shared
            .plan(Operation::PrepareDownload, "/data/a\n/data/b", "/stage/x.tar.gz")
            .unwrap();
        assert_eq!(
            cmd.args,
            vec!["-czf", "/stage/x.tar.gz", "--", "/data/a", "/data/b"]
        );
    }
}
