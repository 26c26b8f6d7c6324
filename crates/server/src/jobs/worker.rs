// crates/server/src/jobs/worker.rs
//! Supervising task for one job run.
//!
//! The worker is the only writer of its job's row while the job is live:
//! it marks the row running, streams output into the tail/log buffers,
//! flushes progress on a timer, and writes the terminal state once the
//! process has exited.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ferry_core::{
    Job, JobId, JobStatus, LogBuffer, Operation, OutputStream, ProcessExit, ProgressTracker,
    TailBuffer, TransferCommand,
};
use ferry_db::{JobOutcome, ProgressUpdate};
use tokio::time::MissedTickBehavior;

use super::orchestrator::{LiveJob, Shared};
use crate::metrics;

/// Exit status recorded when the program could not be started at all.
pub(crate) const EXIT_STATUS_LAUNCH_FAILED: i32 = 127;

/// After exit, stop reading once the pipe has been quiet this long.
const OUTPUT_DRAIN_IDLE: Duration = Duration::from_millis(250);

/// Upper bound on post-exit reading. A backgrounded grandchild can hold the
/// pipe open indefinitely.
const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_secs(2);

const MAX_ERROR_LINES: usize = 5;

/// Removes the job from the live map however the worker ends.
struct LiveGuard {
    shared: Arc<Shared>,
    id: JobId,
    live: LiveJob,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        // A resume may already have registered a newer run under this id.
        self.shared
            .live
            .remove_if(&self.id, |_, current| current.same_as(&self.live));
        metrics::job_deactivated();
        if self.shared.live.is_empty() {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Output captured so far plus the progress derived from it.
struct Capture {
    tail: TailBuffer,
    log: LogBuffer,
    tracker: ProgressTracker,
    dirty: bool,
}

impl Capture {
    fn new(tail_bytes: usize, log_cap_bytes: usize) -> Self {
        Self {
            tail: TailBuffer::new(tail_bytes),
            log: LogBuffer::new(log_cap_bytes),
            tracker: ProgressTracker::new(),
            dirty: false,
        }
    }

    fn push(&mut self, text: &str) {
        self.tail.push_str(text);
        self.log.push_str(text);
        self.dirty = true;
    }

    /// Parse the tail and write a snapshot if anything arrived since the
    /// last flush.
    async fn flush(&mut self, shared: &Shared, id: JobId) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let reading = self.tracker.observe(self.tail.as_str());
        let update = ProgressUpdate {
            progress: self.tracker.percent(),
            transfer: reading.or_else(|| self.tracker.last().cloned()),
            live_text: self.tail.as_str().to_string(),
        };
        if let Err(e) = shared.db.update_job_progress(id, &update).await {
            tracing::warn!(job_id = id, error = %e, "failed to write progress");
        }
    }
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    id: JobId,
    operation: Operation,
    command: TransferCommand,
    live: LiveJob,
) {
    let _live = LiveGuard {
        shared: Arc::clone(&shared),
        id,
        live: live.clone(),
    };
    let started = Instant::now();

    match shared.db.mark_job_running(id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(job_id = id, "job is no longer pending, not starting");
            return;
        }
        Err(e) => {
            // Row stays pending; the next restart marks it interrupted.
            tracing::error!(job_id = id, error = %e, "failed to mark job running");
            return;
        }
    }

    let mut capture = Capture::new(shared.settings.tail_bytes, shared.settings.log_cap_bytes);

    if live.stop.is_requested() {
        if !live.is_cancelled() {
            tracing::info!(job_id = id, "shutdown before launch, left for recovery");
            return;
        }
        tracing::info!(job_id = id, "job cancelled before launch");
        let outcome = JobOutcome {
            status: JobStatus::Cancelled,
            progress: 0,
            transfer: None,
            live_text: String::new(),
            log_text: String::new(),
            error_text: None,
            exit_status: -1,
            download_token: None,
            finished_at: Utc::now(),
        };
        notify_failure(&shared, id, operation).await;
        finalize(&shared, id, operation, outcome, started).await;
        return;
    }

    let process = match shared.runner.start(&command, live.stop.clone()) {
        Ok(process) => process,
        Err(e) => {
            tracing::warn!(job_id = id, error = %e, "job failed to launch");
            let outcome = JobOutcome {
                status: JobStatus::Failed,
                progress: 0,
                transfer: None,
                live_text: String::new(),
                log_text: String::new(),
                error_text: Some(e.to_string()),
                exit_status: EXIT_STATUS_LAUNCH_FAILED,
                download_token: None,
                finished_at: Utc::now(),
            };
            notify_failure(&shared, id, operation).await;
            finalize(&shared, id, operation, outcome, started).await;
            return;
        }
    };
    tracing::info!(job_id = id, pid = process.pid(), command = %command.display(), "job started");

    let (mut output, mut exit) = process.into_parts();
    let mut ticker = tokio::time::interval(shared.settings.progress_flush);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut output_open = true;

    let result = loop {
        tokio::select! {
            chunk = output.next_chunk(), if output_open => match chunk {
                Some(text) => capture.push(&text),
                None => output_open = false,
            },
            _ = ticker.tick() => capture.flush(&shared, id).await,
            result = &mut exit => break result,
        }
    };

    if output_open {
        drain_output(&mut output, &mut capture, id).await;
    }

    let exit = match result {
        Ok(exit) => exit,
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "lost track of job process");
            ProcessExit {
                code: -1,
                stopped: false,
                killed: false,
            }
        }
    };

    if exit.stopped && shared.is_shutting_down() && !live.is_cancelled() {
        capture.flush(&shared, id).await;
        tracing::info!(job_id = id, "job stopped by shutdown, left for recovery");
        return;
    }

    let outcome = conclude(&shared, id, operation, exit, capture).await;
    finalize(&shared, id, operation, outcome, started).await;
}

/// Read what the process left in the pipe, until it closes, goes quiet,
/// or the overall limit passes.
async fn drain_output(output: &mut OutputStream, capture: &mut Capture, id: JobId) {
    let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_LIMIT;
    loop {
        let idle_until = (tokio::time::Instant::now() + OUTPUT_DRAIN_IDLE).min(deadline);
        match tokio::time::timeout_at(idle_until, output.next_chunk()).await {
            Ok(Some(text)) => capture.push(&text),
            Ok(None) => return,
            Err(_) => {
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(job_id = id, "output still flowing after exit, stopped reading");
                }
                return;
            }
        }
    }
}

/// Decide the terminal status and run the operation's hook.
async fn conclude(
    shared: &Shared,
    id: JobId,
    operation: Operation,
    exit: ProcessExit,
    mut capture: Capture,
) -> JobOutcome {
    capture.tracker.observe(capture.tail.as_str());
    let log_text = capture.log.to_text();

    let (mut status, mut error_text) = if exit.stopped {
        (JobStatus::Cancelled, None)
    } else if exit.success() {
        (JobStatus::Completed, None)
    } else {
        (JobStatus::Failed, Some(failure_summary(capture.log.as_str(), exit.code)))
    };

    let mut download_token = None;
    if let Some(hook) = shared.hook_for(operation) {
        match load_job(shared, id).await {
            Some(job) if status == JobStatus::Completed => match hook.on_success(&job).await {
                Ok(extra) => download_token = extra.download_token,
                Err(message) => {
                    tracing::warn!(job_id = id, %message, "completion hook rejected job");
                    status = JobStatus::Failed;
                    error_text = Some(message);
                    hook.on_failure(&job).await;
                }
            },
            Some(job) => hook.on_failure(&job).await,
            None if status == JobStatus::Completed => {
                status = JobStatus::Failed;
                error_text = Some("job record unavailable for post-processing".to_string());
            }
            None => {}
        }
    }

    if status == JobStatus::Completed {
        capture.tracker.complete();
    }

    JobOutcome {
        status,
        progress: capture.tracker.percent(),
        transfer: capture.tracker.last().cloned(),
        live_text: capture.tail.as_str().to_string(),
        log_text,
        error_text,
        exit_status: exit.code,
        download_token,
        finished_at: Utc::now(),
    }
}

async fn load_job(shared: &Shared, id: JobId) -> Option<Job> {
    match shared.db.get_job(id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "failed to load job");
            None
        }
    }
}

async fn notify_failure(shared: &Shared, id: JobId, operation: Operation) {
    if let Some(hook) = shared.hook_for(operation) {
        if let Some(job) = load_job(shared, id).await {
            hook.on_failure(&job).await;
        }
    }
}

async fn finalize(
    shared: &Shared,
    id: JobId,
    operation: Operation,
    outcome: JobOutcome,
    started: Instant,
) {
    match shared.db.finish_job(id, &outcome).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(job_id = id, "job already terminal, outcome dropped"),
        Err(e) => tracing::error!(job_id = id, error = %e, "failed to record job outcome"),
    }
    metrics::record_job_finished(operation, outcome.status, started.elapsed());
    tracing::info!(
        job_id = id,
        status = %outcome.status,
        exit_status = outcome.exit_status,
        progress = outcome.progress,
        duration_secs = started.elapsed().as_secs_f64(),
        "job finished"
    );
}

/// Record a job whose worker panicked as failed.
pub(crate) async fn fail_after_panic(shared: &Shared, id: JobId, operation: Operation) {
    let outcome = JobOutcome {
        status: JobStatus::Failed,
        progress: 0,
        transfer: None,
        live_text: String::new(),
        log_text: String::new(),
        error_text: Some("internal worker error".to_string()),
        exit_status: -1,
        download_token: None,
        finished_at: Utc::now(),
    };
    notify_failure(shared, id, operation).await;
    if let Err(e) = shared.db.finish_job(id, &outcome).await {
        tracing::error!(job_id = id, error = %e, "failed to record panicked job");
    }
    metrics::record_job_finished(operation, JobStatus::Failed, Duration::ZERO);
}

/// The last few error-looking lines of output, or a generic message.
pub(crate) fn failure_summary(log: &str, code: i32) -> String {
    let mut lines: Vec<&str> = log
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && (line.contains("ERROR") || line.contains("Failed") || line.contains("error"))
        })
        .rev()
        .take(MAX_ERROR_LINES)
        .collect();
    if lines.is_empty() {
        return format!("transfer tool exited with status {code}");
    }
    lines.reverse();
    lines.join("\n")
}
