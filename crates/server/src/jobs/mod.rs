// crates/server/src/jobs/mod.rs
//! Transfer job orchestration.
//!
//! - `JobOrchestrator` — submit, cancel, resume, recover, purge
//! - `worker` — one supervising task per running job
//! - `ProgressBroadcaster` — timer-driven snapshot feed per job
//! - `CompletionHook` — per-operation post-processing

pub mod broadcast;
pub mod hook;
pub mod orchestrator;
mod worker;

pub use broadcast::{BroadcastEvent, ProgressBroadcaster};
pub use hook::{CompletionHook, HookOutcome};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings};

use ferry_core::{JobId, JobStatus, PlanError};
use ferry_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Cannot {action} job {id} in status {status}")]
    InvalidTransition {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl JobError {
    pub(crate) fn transition(id: JobId, status: JobStatus, action: &'static str) -> Self {
        Self::InvalidTransition { id, status, action }
    }
}
