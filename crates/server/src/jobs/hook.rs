// crates/server/src/jobs/hook.rs
//! Per-operation completion hooks.
//!
//! A hook runs inside the job's worker after the process has exited and
//! before the terminal row is written, so anything it attaches (a download
//! token) becomes visible in the same write as the status.

use async_trait::async_trait;
use ferry_core::Job;

/// What a successful hook contributes to the terminal record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOutcome {
    pub download_token: Option<String>,
}

#[async_trait]
pub trait CompletionHook: Send + Sync {
    /// Called when the process exited with status 0. Returning `Err`
    /// vetoes success and the job is recorded as failed with that message.
    async fn on_success(&self, job: &Job) -> Result<HookOutcome, String>;

    /// Called when the job is about to be recorded as failed or cancelled.
    async fn on_failure(&self, _job: &Job) {}
}
