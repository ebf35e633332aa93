use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::{Result, ServiceError};
use crate::models::api::{
    CancelResponse, CreateJobRequest, CreateJobResponse, EngineJobView, JobView, ParamsResponse,
};
use crate::models::job::Job;
use crate::services::notifications;

/// Header value the render engine sends when it fetches its own job.
const ENGINE_CLIENT: &str = "ue5";

async fn load_job(state: &AppState, job_id: Uuid) -> Result<Job> {
    queries::get_job(&state.db, job_id)
        .await?
        .ok_or(ServiceError::JobNotFound(job_id))
}

/// POST /jobs — Admit a render job into the queue.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>> {
    request.validate()?;

    if state.templates.get(&request.template_id).is_none() {
        return Err(ServiceError::UnknownTemplate(request.template_id));
    }

    let payload = request.into_payload();
    let raw = serde_json::to_string(&payload)
        .map_err(|e| ServiceError::Validation(format!("unserializable params: {e}")))?;
    let job = Job::new(&payload.template_id, payload.session_id.clone(), raw);

    queries::insert_job(&state.db, &job).await?;
    let queue_position = queries::queue_position(&state.db, job.id).await?;

    metrics::counter!("render_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job.id,
        template_id = %job.template_id,
        queue_position,
        "Job queued"
    );

    Ok(Json(CreateJobResponse {
        session_id: job.session_id,
        job_id: job.id,
        status: job.status,
        queue_position,
        template_id: job.template_id,
    }))
}

/// GET /jobs/{job_id} — Full job view, or the engine view for `X-Client: ue5`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response> {
    let job = load_job(&state, job_id).await?;

    let from_engine = headers
        .get("x-client")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(ENGINE_CLIENT));

    if from_engine {
        return Ok(Json(EngineJobView::from(&job)).into_response());
    }
    Ok(Json(JobView::from_job(&job, true)).into_response())
}

/// GET /jobs/{job_id}/progress
pub async fn get_progress(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>> {
    let job = load_job(&state, job_id).await?;
    Ok(Json(JobView::from_job(&job, false)))
}

/// GET /jobs/{job_id}/params
pub async fn get_params(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ParamsResponse>> {
    let job = load_job(&state, job_id).await?;
    Ok(Json(ParamsResponse {
        params: job.params(),
    }))
}

/// POST /jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<CancelResponse>> {
    let job =
        notifications::cancel(&state.db, &state.supervisor, job_id, state.cancel_grace).await?;

    Ok(Json(CancelResponse {
        session_id: job.session_id,
        job_id: job.id,
        status: job.status,
        message: format!("job {} canceled", job.id),
    }))
}
