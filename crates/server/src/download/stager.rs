// crates/server/src/download/stager.rs
//! Download Stager.
//!
//! `prepare` either points the client straight at a single local file or
//! starts a prepare-download job that archives the paths into the staging
//! directory. On success the job's completion hook mints a token bound to
//! the artifact; `redeem` consumes it exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use ferry_core::{validate_location, Job, JobId, Operation, PlanError};
use ferry_db::Database;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::jobs::{CompletionHook, HookOutcome, JobError, JobOrchestrator};
use crate::metrics;

const TOKEN_BYTES: usize = 32;
const ARTIFACT_PREFIX: &str = "ferry-";

#[derive(Debug, Error)]
pub enum StagerError {
    #[error("Download token not found")]
    TokenNotFound,

    #[error("no paths given")]
    NoPaths,

    #[error("paths must not contain line breaks")]
    MultilinePath,

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagerError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum PrepareOutcome {
    /// The request is a single local file; no job was created.
    #[serde(rename = "direct")]
    Direct { path: String },
    /// An archiving job was started.
    #[serde(rename = "job", rename_all = "camelCase")]
    Job { job_id: JobId },
}

/// An artifact waiting for its token to be redeemed.
#[derive(Debug, Clone)]
struct StagedArtifact {
    job_id: JobId,
    path: PathBuf,
    created_at: Instant,
}

type TokenMap = DashMap<String, StagedArtifact>;

/// A consumed artifact. The file is already unlinked; the open handle is
/// the only way left to read it.
#[derive(Debug)]
pub struct RedeemedArtifact {
    pub job_id: JobId,
    pub file: tokio::fs::File,
    pub len: u64,
}

impl RedeemedArtifact {
    pub fn filename(&self) -> String {
        format!("{ARTIFACT_PREFIX}{}.tar.gz", self.job_id)
    }
}

/// Completion hook for prepare-download jobs.
struct ArtifactHook {
    tokens: Arc<TokenMap>,
}

#[async_trait]
impl CompletionHook for ArtifactHook {
    async fn on_success(&self, job: &Job) -> Result<HookOutcome, String> {
        let path = PathBuf::from(&job.destination);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) | Err(_) => return Err(format!("archive {} was not produced", path.display())),
        }
        let token = mint_token();
        self.tokens.insert(
            token.clone(),
            StagedArtifact {
                job_id: job.id,
                path,
                created_at: Instant::now(),
            },
        );
        tracing::info!(job_id = job.id, "download token issued");
        Ok(HookOutcome {
            download_token: Some(token),
        })
    }

    async fn on_failure(&self, job: &Job) {
        remove_artifact(Path::new(&job.destination)).await;
    }
}

fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "artifact removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}

#[derive(Clone)]
pub struct DownloadStager {
    db: Database,
    orchestrator: JobOrchestrator,
    staging_dir: PathBuf,
    ttl: Duration,
    tokens: Arc<TokenMap>,
}

impl DownloadStager {
    /// Build the stager and register its hook for prepare-download jobs.
    pub fn new(orchestrator: JobOrchestrator, staging_dir: PathBuf, ttl: Duration) -> Self {
        let tokens = Arc::new(TokenMap::new());
        orchestrator.register_hook(
            Operation::PrepareDownload,
            Arc::new(ArtifactHook {
                tokens: Arc::clone(&tokens),
            }),
        );
        Self {
            db: orchestrator.db().clone(),
            orchestrator,
            staging_dir,
            ttl,
            tokens,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Number of issued, unredeemed tokens.
    pub fn outstanding(&self) -> usize {
        self.tokens.len()
    }

    pub async fn prepare(&self, paths: &[String]) -> Result<PrepareOutcome, StagerError> {
        if paths.is_empty() {
            return Err(StagerError::NoPaths);
        }
        for path in paths {
            if path.contains(['\n', '\r']) {
                return Err(StagerError::MultilinePath);
            }
            validate_location("path", path)?;
        }

        if let [single] = paths {
            if let Ok(meta) = tokio::fs::metadata(single).await {
                if meta.is_file() {
                    return Ok(PrepareOutcome::Direct {
                        path: single.clone(),
                    });
                }
            }
        }

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| StagerError::io(&self.staging_dir, e))?;
        let artifact = self
            .staging_dir
            .join(format!("{ARTIFACT_PREFIX}{}.tar.gz", uuid::Uuid::new_v4()));
        let job_id = self.orchestrator.submit_archive(paths, &artifact).await?;
        Ok(PrepareOutcome::Job { job_id })
    }

    /// Consume a token. A second call with the same token is `TokenNotFound`.
    pub async fn redeem(&self, token: &str) -> Result<RedeemedArtifact, StagerError> {
        let (_, staged) = self.tokens.remove(token).ok_or(StagerError::TokenNotFound)?;

        if staged.created_at.elapsed() >= self.ttl {
            tracing::info!(job_id = staged.job_id, "download token expired");
            self.discard(token, &staged).await;
            return Err(StagerError::TokenNotFound);
        }

        let file = match tokio::fs::File::open(&staged.path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(job_id = staged.job_id, error = %e, "artifact vanished before redemption");
                self.clear_token(token, staged.job_id).await;
                return Err(StagerError::TokenNotFound);
            }
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| StagerError::io(&staged.path, e))?
            .len();

        remove_artifact(&staged.path).await;
        self.clear_token(token, staged.job_id).await;
        metrics::record_download_redeemed();
        tracing::info!(job_id = staged.job_id, bytes = len, "download redeemed");

        Ok(RedeemedArtifact {
            job_id: staged.job_id,
            file,
            len,
        })
    }

    async fn clear_token(&self, token: &str, job_id: JobId) {
        if let Err(e) = self.db.clear_download_token(job_id, token).await {
            tracing::warn!(job_id, error = %e, "failed to clear download token");
        }
    }

    async fn discard(&self, token: &str, staged: &StagedArtifact) {
        remove_artifact(&staged.path).await;
        self.clear_token(token, staged.job_id).await;
    }

    /// Expire old tokens and delete stray files in the staging dir.
    /// Returns how many tokens expired.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .tokens
            .iter()
            .filter(|entry| entry.created_at.elapsed() >= ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut count = 0;
        for token in expired {
            if let Some((token, staged)) = self
                .tokens
                .remove_if(&token, |_, staged| staged.created_at.elapsed() >= ttl)
            {
                tracing::info!(job_id = staged.job_id, "download token expired");
                self.discard(&token, &staged).await;
                count += 1;
            }
        }

        self.remove_stale_files().await;
        count
    }

    async fn remove_stale_files(&self) {
        let mut entries = match tokio::fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(dir = %self.staging_dir.display(), error = %e, "failed to read staging dir");
                return;
            }
        };
        let cutoff = SystemTime::now().checked_sub(self.ttl);
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_artifact_name(&path) || self.tokens.iter().any(|t| t.path == path) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if cutoff.is_some_and(|cutoff| modified < cutoff) {
                tracing::info!(path = %path.display(), "removing stale staging file");
                remove_artifact(&path).await;
            }
        }
    }

    /// Startup cleanup: tokens recorded by a previous run no longer resolve,
    /// so clear them from the store and delete their artifacts. Must run
    /// before the first prepare.
    pub async fn recover_on_start(&self) -> Result<usize, StagerError> {
        let cleared = self
            .db
            .clear_all_download_tokens()
            .await
            .map_err(JobError::from)?;
        if cleared > 0 {
            tracing::warn!(cleared, "download tokens from previous run invalidated");
        }
        self.purge_staging_dir().await
    }

    /// Delete everything left in the staging dir by a previous run.
    pub async fn purge_staging_dir(&self) -> Result<usize, StagerError> {
        let mut entries = match tokio::fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StagerError::io(&self.staging_dir, e)),
        };
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagerError::io(&self.staging_dir, e))?
        {
            let path = entry.path();
            if is_artifact_name(&path) {
                remove_artifact(&path).await;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "purged staging dir");
        }
        Ok(removed)
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let stager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let expired = stager.sweep_expired().await;
                if expired > 0 {
                    tracing::debug!(expired, "download sweep");
                }
            }
        })
    }

    /// Drop every outstanding token and delete its artifact.
    pub async fn shutdown(&self) {
        let tokens: Vec<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        for token in tokens {
            if let Some((token, staged)) = self.tokens.remove(&token) {
                self.discard(&token, &staged).await;
            }
        }
    }
}

fn is_artifact_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX) && name.ends_with(".tar.gz"))
}

impl std::fmt::Debug for DownloadStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStager")
            .field("staging_dir", &self.staging_dir)
            .field("ttl", &self.ttl)
            .field("outstanding", &self.tokens.len())
            .finish()
    }
}
