use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — Prometheus text exposition of the job counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service emits.
pub fn describe() {
    metrics::describe_counter!("render_jobs_submitted_total", "Render jobs admitted into the queue");
    metrics::describe_counter!(
        "render_jobs_dispatched_total",
        "Render jobs claimed by the scheduler and handed to a runner"
    );
    metrics::describe_counter!("render_jobs_failed_total", "Render jobs that ended failed");
    metrics::describe_counter!("render_jobs_canceled_total", "Render jobs that ended canceled");
    metrics::describe_gauge!("render_jobs_running", "Runners currently supervising an engine");
    metrics::describe_histogram!(
        "render_job_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time a runner spent on one job"
    );
}
