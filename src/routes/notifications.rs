//! Callbacks the render engine makes while it works on a job.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::Result;
use crate::models::api::{EncodingStatusUpdate, NotificationAck, ProgressUpdate, RenderComplete};
use crate::services::notifications;

/// POST /ue-notifications/job/{job_id}/progress
pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(update): Json<ProgressUpdate>,
) -> Result<Json<NotificationAck>> {
    notifications::apply_progress(&state.db, job_id, update).await?;
    Ok(Json(NotificationAck::success()))
}

/// POST /ue-notifications/job/{job_id}/render-complete
pub async fn render_complete(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<RenderComplete>,
) -> Result<Json<NotificationAck>> {
    notifications::apply_render_complete(&state.db, job_id, body).await?;
    Ok(Json(NotificationAck::success()))
}

/// POST /ue-notifications/job/{job_id}/encoding-status
pub async fn encoding_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<EncodingStatusUpdate>,
) -> Result<Json<NotificationAck>> {
    notifications::apply_encoding_status(&state.db, job_id, body).await?;
    Ok(Json(NotificationAck::success()))
}
