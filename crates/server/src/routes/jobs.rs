// crates/server/src/routes/jobs.rs
//! API routes for transfer jobs.
//!
//! - POST /jobs — Submit a copy/move/sync/check job
//! - GET /jobs — List jobs, newest first
//! - GET /jobs/{id} — Job snapshot
//! - DELETE /jobs/{id} — Purge a finished job
//! - POST /jobs/{id}/stop — Request cancellation
//! - POST /jobs/{id}/resume — Re-run an interrupted or failed job
//! - GET /jobs/{id}/stream — SSE progress feed

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use ferry_core::{JobId, JobSnapshot, JobStatus, Operation};
use ferry_db::JobFilter;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::{ApiError, ApiResult};
use crate::jobs::BroadcastEvent;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub operation: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopAccepted {
    pub job_id: JobId,
    pub status: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListJobsQuery {
    fn into_filter(self) -> ApiResult<JobFilter> {
        let status = self
            .status
            .map(|s| s.parse::<JobStatus>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(JobFilter {
            status,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// POST /api/jobs
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let operation: Operation = req
        .operation
        .parse()
        .map_err(|e: ferry_core::ParseOperationError| ApiError::BadRequest(e.to_string()))?;
    let job_id = state
        .orchestrator
        .submit(operation, &req.source, &req.destination)
        .await?;
    Ok((StatusCode::CREATED, Json(JobAccepted { job_id })))
}

/// GET /api/jobs
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobSnapshot>>> {
    let filter = query.into_filter()?;
    let jobs = state.orchestrator.list(&filter).await?;
    Ok(Json(jobs.iter().map(|job| job.snapshot()).collect()))
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobSnapshot>> {
    let job = state.orchestrator.get(id).await?;
    Ok(Json(job.snapshot()))
}

/// DELETE /api/jobs/{id}
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<StatusCode> {
    state.orchestrator.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{id}/stop
async fn stop_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<(StatusCode, Json<StopAccepted>)> {
    state.orchestrator.cancel(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StopAccepted {
            job_id: id,
            status: "cancelling",
        }),
    ))
}

/// POST /api/jobs/{id}/resume
async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let job_id = state.orchestrator.resume(id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

/// GET /api/jobs/{id}/stream — `progress` events until a final `done`,
/// or `gone` if the job is purged mid-stream.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let feed = state.broadcaster.subscribe(id).await?;
    let stream = feed.map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &BroadcastEvent) -> Event {
    match event {
        BroadcastEvent::Progress(snapshot) => Event::default()
            .event("progress")
            .data(serde_json::to_string(snapshot).unwrap_or_default()),
        BroadcastEvent::Done(snapshot) => Event::default()
            .event("done")
            .data(serde_json::to_string(snapshot).unwrap_or_default()),
        BroadcastEvent::Gone(id) => Event::default()
            .event("gone")
            .data(serde_json::json!({ "jobId": id }).to_string()),
        BroadcastEvent::Unavailable(id) => Event::default().event("error").data(
            serde_json::json!({ "jobId": id, "error": "job store unavailable" }).to_string(),
        ),
    }
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/stop", post(stop_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/stream", get(stream_job))
}
