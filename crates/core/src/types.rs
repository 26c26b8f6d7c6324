// crates/core/src/types.rs
//! Job data model shared by the store, the orchestrator and the HTTP layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseOperationError, ParseStatusError};

/// Stable identity of a job. Assigned by the store, never reused.
pub type JobId = i64;

/// Exit status recorded while a job has not finished yet.
pub const EXIT_STATUS_PENDING: i32 = -1;

/// The transfer verb a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Copy,
    Move,
    Sync,
    Check,
    PrepareDownload,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Copy,
        Operation::Move,
        Operation::Sync,
        Operation::Check,
        Operation::PrepareDownload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Copy => "copy",
            Operation::Move => "move",
            Operation::Sync => "sync",
            Operation::Check => "check",
            Operation::PrepareDownload => "prepare-download",
        }
    }

    /// Subcommand passed to the transfer tool, `None` for operations that
    /// are not driven by the transfer tool.
    pub fn transfer_verb(self) -> Option<&'static str> {
        match self {
            Operation::Copy => Some("copy"),
            Operation::Move => Some("move"),
            Operation::Sync => Some("sync"),
            Operation::Check => Some("check"),
            Operation::PrepareDownload => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ParseOperationError(s.to_string()))
    }
}

/// Lifecycle status of a job.
///
/// ```text
/// pending -> running -> completed | failed | cancelled
/// running -> interrupted            (restart recovery only)
/// interrupted | failed -> pending   (resume only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Interrupted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Interrupted => "interrupted",
        }
    }

    /// Terminal statuses never change again except through resume or purge.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Whether `resume()` may restart a job in this status.
    pub fn is_resumable(self) -> bool {
        matches!(self, JobStatus::Interrupted | JobStatus::Failed)
    }

    /// Whether the edge `self -> next` exists in the lifecycle graph.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Interrupted)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Interrupted)
                | (Interrupted, Pending)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// One structured reading of the transfer tool's stats line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub percent: u8,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

/// A job record as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub operation: Operation,
    pub source: String,
    pub destination: String,
    pub status: JobStatus,
    pub progress: u8,
    pub transfer: Option<TransferProgress>,
    pub live_text: String,
    pub log_text: String,
    pub error_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_status: i32,
    pub download_token: Option<String>,
    pub attempt: u32,
}

impl Job {
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Project the record into its client-visible shape.
    pub fn snapshot(&self) -> JobSnapshot {
        let finished = self.is_finished();
        JobSnapshot {
            job_id: self.id,
            operation: self.operation,
            source: self.source.clone(),
            destination: self.destination.clone(),
            status: self.status,
            progress: self.progress,
            text: self.live_text.clone(),
            log: finished.then(|| self.log_text.clone()),
            error_text: self.error_text.clone(),
            finished,
            exit_status: self.exit_status,
            transfer: self.transfer.clone(),
            download_token: self.download_token.clone(),
            attempt: self.attempt,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Progress snapshot served by the read, list and stream endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub operation: Operation,
    pub source: String,
    pub destination: String,
    pub status: JobStatus,
    pub progress: u8,
    pub text: String,
    /// Full captured output, only present once the job is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    pub finished: bool,
    pub exit_status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_token: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
