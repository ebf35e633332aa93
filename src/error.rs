//! Service-level error type.
//!
//! Job-level failures (spawn, timeout, signal conflict) are recorded on the
//! job itself by the runner; the variants exist so the reason text is built
//! in one place. Everything reaching an HTTP handler converts into a JSON
//! response through [`IntoResponse`].

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::status::JobStatus;
use crate::services::process::ProcessError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("illegal transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Admission referenced a template the registry does not know.
    #[error("unknown template_id: {0}")]
    UnknownTemplate(String),

    #[error("job {job_id} cannot be canceled in status {status}")]
    NotCancelable { job_id: Uuid, status: JobStatus },

    #[error("failed to launch render process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("render did not finish within {0:?}")]
    Timeout(Duration),

    #[error("render process exited cleanly before the engine reported completion")]
    ExternalSignalConflict,

    #[error("concurrent updates kept racing on job {0}")]
    Conflict(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidStatus(_) => "INVALID_STATUS",
            ServiceError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::JobNotFound(_) => "JOB_NOT_FOUND",
            ServiceError::TemplateNotFound(_) | ServiceError::UnknownTemplate(_) => {
                "TEMPLATE_NOT_FOUND"
            }
            ServiceError::NotCancelable { .. } => "JOB_NOT_CANCELABLE",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Spawn(_)
            | ServiceError::Timeout(_)
            | ServiceError::ExternalSignalConflict
            | ServiceError::Database(_)
            | ServiceError::Io(_) => "INTERNAL_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidStatus(_)
            | ServiceError::UnknownTemplate(_)
            | ServiceError::NotCancelable { .. } => StatusCode::BAD_REQUEST,
            ServiceError::InvalidTransition { .. } | ServiceError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::JobNotFound(_) | ServiceError::TemplateNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProcessError> for ServiceError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Spawn { source, .. } => ServiceError::Spawn(source),
            ProcessError::Poll(e) => ServiceError::Io(e),
        }
    }
}

impl From<garde::Report> for ServiceError {
    fn from(report: garde::Report) -> Self {
        ServiceError::Validation(report.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({ "error": { "code": self.code(), "message": message } })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
