// crates/server/src/lib.rs
//! Ferry server library.
//!
//! Runs copy/move/sync/check jobs through an external transfer tool,
//! keeps their state in SQLite across restarts, and serves the job and
//! download API over axum.

pub mod download;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod state;

pub use download::{DownloadStager, PrepareOutcome};
pub use error::*;
pub use jobs::{JobOrchestrator, OrchestratorSettings, ProgressBroadcaster};
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes under `/api` and `/metrics`
/// - CORS for the browser UI (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
