//! API route handlers for the ferry server.

pub mod downloads;
pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET /api/health - Health check
/// - POST /api/jobs - Submit a transfer job
/// - GET /api/jobs - List jobs (status/limit/offset)
/// - GET /api/jobs/{id} - Job snapshot
/// - DELETE /api/jobs/{id} - Purge a finished job
/// - POST /api/jobs/{id}/stop - Cancel a live job
/// - POST /api/jobs/{id}/resume - Resume an interrupted or failed job
/// - GET /api/jobs/{id}/stream - SSE progress feed
/// - POST /api/downloads - Prepare a download
/// - GET /api/downloads/{token} - Redeem a download token
/// - GET /metrics - Prometheus metrics (no /api prefix)
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", downloads::router())
        .merge(metrics::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn test_api_routes_creation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let _router = api_routes(state);
    }
}
