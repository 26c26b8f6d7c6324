//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters, histograms, gauges)
//! - Helper functions for recording job and download metrics
//!
//! Recording before `init_metrics` is a no-op.

use ferry_core::{JobStatus, Operation};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "ferry_jobs_submitted_total",
        "Jobs submitted or resumed, by operation"
    );
    describe_counter!(
        "ferry_jobs_finished_total",
        "Jobs that reached a terminal status, by operation and status"
    );
    describe_counter!(
        "ferry_downloads_redeemed_total",
        "Download tokens redeemed"
    );
    describe_gauge!("ferry_jobs_active", "Jobs with a live worker");
    describe_histogram!(
        "ferry_job_duration_seconds",
        "Wall time from worker start to terminal status"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted(operation: Operation) {
    counter!("ferry_jobs_submitted_total", "operation" => operation.as_str()).increment(1);
}

pub fn record_job_finished(operation: Operation, status: JobStatus, duration: Duration) {
    counter!(
        "ferry_jobs_finished_total",
        "operation" => operation.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
    histogram!("ferry_job_duration_seconds", "operation" => operation.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_download_redeemed() {
    counter!("ferry_downloads_redeemed_total").increment(1);
}

pub fn job_activated() {
    gauge!("ferry_jobs_active").increment(1.0);
}

pub fn job_deactivated() {
    gauge!("ferry_jobs_active").decrement(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_render() {
        // Another test in this binary may have initialised the recorder.
        init_metrics();
        assert!(!init_metrics());

        record_job_submitted(Operation::Sync);
        record_job_finished(Operation::Sync, JobStatus::Completed, Duration::from_millis(1500));
        record_download_redeemed();
        job_activated();
        job_deactivated();

        let output = render_metrics().expect("metrics initialised");
        assert!(output.contains("ferry_jobs_submitted_total"));
        assert!(output.contains("operation=\"sync\""));
        assert!(output.contains("ferry_jobs_finished_total"));
        assert!(output.contains("status=\"completed\""));
        assert!(output.contains("ferry_downloads_redeemed_total"));
        assert!(output.contains("ferry_job_duration_seconds"));
    }
}
