pub mod health;
pub mod jobs;
pub mod metrics;
pub mod notifications;
pub mod templates;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

const BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Build the full HTTP surface.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    let notifications = Router::new()
        .route("/{job_id}/progress", post(notifications::progress))
        .route("/{job_id}/render-complete", post(notifications::render_complete))
        .route("/{job_id}/encoding-status", post(notifications::encoding_status));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/templates", get(templates::list_templates))
        .route("/jobs", post(jobs::create_job))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .route("/jobs/{job_id}/progress", get(jobs::get_progress))
        .route("/jobs/{job_id}/params", get(jobs::get_params))
        .route("/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .nest("/ue-notifications/job", notifications)
        .with_state(state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
