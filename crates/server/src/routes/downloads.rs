// crates/server/src/routes/downloads.rs
//! API routes for staged downloads.
//!
//! - POST /downloads — Prepare a download for a set of paths
//! - GET /downloads/{token} — Redeem a token for the artifact bytes

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::download::PrepareOutcome;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PrepareDownloadRequest {
    pub paths: Vec<String>,
}

/// POST /api/downloads — 200 for a direct file, 202 when a job was started.
async fn prepare_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PrepareDownloadRequest>,
) -> ApiResult<(StatusCode, Json<PrepareOutcome>)> {
    let outcome = state.stager.prepare(&req.paths).await?;
    let status = match outcome {
        PrepareOutcome::Direct { .. } => StatusCode::OK,
        PrepareOutcome::Job { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

/// GET /api/downloads/{token}
async fn redeem_download(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let artifact = state.stager.redeem(&token).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/gzip".to_string()),
        (header::CONTENT_LENGTH, artifact.len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.filename()),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(artifact.file));
    Ok((headers, body).into_response())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/downloads", post(prepare_download))
        .route("/downloads/{token}", get(redeem_download))
}
