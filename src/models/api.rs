use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobPayload, Quality, VideoFormat};
use super::status::JobStatus;

/// Request to admit a new render job.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[garde(length(min = 1, max = 64))]
    pub template_id: String,

    #[garde(skip)]
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    #[garde(skip)]
    #[serde(default)]
    pub quality: Quality,

    #[garde(skip)]
    #[serde(default)]
    pub format: VideoFormat,

    #[garde(length(min = 1, max = 64))]
    pub session_id: Option<String>,
}

impl CreateJobRequest {
    pub fn into_payload(self) -> JobPayload {
        JobPayload {
            template_id: self.template_id,
            params: serde_json::Value::Object(self.params),
            quality: self.quality,
            format: self.format,
            session_id: self.session_id,
        }
    }
}

/// Response after admitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub session_id: Option<String>,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub queue_position: i64,
    pub template_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressView {
    pub percent: f64,
    pub eta_seconds: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactsView {
    pub video_url: Option<String>,
    pub video_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimestampsView {
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Client-facing view of a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub session_id: Option<String>,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: ProgressView,
    pub artifacts: Option<ArtifactsView>,
    pub template_id: String,
    pub timestamps: TimestampsView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobView {
    pub fn from_job(job: &Job, with_params: bool) -> Self {
        Self {
            session_id: job.session_id.clone(),
            job_id: job.id,
            status: job.status,
            progress: ProgressView {
                percent: job.progress_percent,
                eta_seconds: job.progress_eta_seconds,
            },
            artifacts: job.artifacts.as_ref().map(|a| ArtifactsView {
                video_url: a.video_url.clone(),
                video_path: a.video_path.clone(),
            }),
            template_id: job.template_id.clone(),
            timestamps: TimestampsView {
                queued_at: job.created_at,
                started_at: job.started_at,
                updated_at: job.updated_at,
                ended_at: job.ended_at,
            },
            params: if with_params { job.params() } else { None },
            error: job.error.clone(),
        }
    }
}

/// View served to the render engine itself (`X-Client: ue5`).
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineJobView {
    pub job_id: Uuid,
    pub artifacts: Option<ArtifactsView>,
    pub payload: Option<serde_json::Value>,
}

impl From<&Job> for EngineJobView {
    fn from(job: &Job) -> Self {
        let payload = match job.payload_json() {
            serde_json::Value::Null => None,
            value => Some(value),
        };
        Self {
            job_id: job.id,
            artifacts: job.artifacts.as_ref().map(|a| ArtifactsView {
                video_url: a.video_url.clone(),
                video_path: a.video_path.clone(),
            }),
            payload,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParamsResponse {
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub session_id: Option<String>,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Progress push from the engine.
#[derive(Debug, Default, Deserialize)]
pub struct ProgressUpdate {
    pub progress_percent: Option<f64>,
    #[serde(alias = "progress_eta_seconds")]
    pub eta_seconds: Option<i64>,
    pub status: Option<String>,
}

/// Render completion push. Either a file or a directory to search.
#[derive(Debug, Default, Deserialize)]
pub struct RenderComplete {
    pub video_path: Option<String>,
    pub video_directory: Option<String>,
}

/// Encoding / upload status push.
#[derive(Debug, Deserialize)]
pub struct EncodingStatusUpdate {
    #[serde(default = "default_encoding_status")]
    pub status: String,
    pub video_url: Option<String>,
}

fn default_encoding_status() -> String {
    JobStatus::Encoding.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationAck {
    pub status: String,
}

impl NotificationAck {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }
}
