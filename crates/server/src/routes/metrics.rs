// crates/server/src/routes/metrics.rs
//! `GET /metrics`: Prometheus scrape target, outside `/api`.

use std::sync::Arc;

use axum::{http::header, response::IntoResponse, routing::get, Router};

use crate::error::{ApiError, ApiResult};
use crate::metrics::render_metrics;
use crate::state::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn scrape() -> ApiResult<impl IntoResponse> {
    let body = render_metrics()
        .ok_or_else(|| ApiError::Unavailable("metrics recorder not installed".to_string()))?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ferry_core::Operation;
    use tower::ServiceExt;

    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn test_scrape_reports_job_counters() {
        crate::metrics::init_metrics();
        crate::metrics::record_job_submitted(Operation::Check);

        let dir = tempfile::tempdir().unwrap();
        let response = crate::create_app(test_state(dir.path()).await)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            super::PROMETHEUS_TEXT
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("ferry_jobs_submitted_total"), "{text}");
        assert!(text.contains("operation=\"check\""), "{text}");
    }
}
