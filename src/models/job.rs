use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use super::status::JobStatus;

/// A render job as stored in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub template_id: String,
    pub status: JobStatus,
    /// Serialized [`JobPayload`]; only the runner and the engine read it.
    pub payload: String,
    pub progress_percent: f64,
    pub progress_eta_seconds: Option<i64>,
    pub pid: Option<u32>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub artifacts: Option<JobArtifacts>,
}

impl Job {
    /// Build a fresh queued job. The record is not persisted.
    pub fn new(template_id: &str, session_id: Option<String>, payload: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            template_id: template_id.to_string(),
            status: JobStatus::Queued,
            payload,
            progress_percent: 0.0,
            progress_eta_seconds: None,
            pid: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            artifacts: None,
        }
    }

    /// Payload as JSON, `Null` when it is missing or malformed.
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }

    /// The caller-supplied `params` object of the payload.
    pub fn params(&self) -> Option<serde_json::Value> {
        match self.payload_json() {
            serde_json::Value::Object(mut map) => map.remove("params"),
            _ => None,
        }
    }
}

/// Output locations attached to a job once it starts producing results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub video_path: Option<String>,
    pub video_url: Option<String>,
    pub ue_log: Option<String>,
}

/// Render quality preset accepted at admission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Low,
    Medium,
    #[default]
    High,
    Epic,
}

/// Container format of the rendered movie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Mp4,
    Mov,
}

/// Parameters stored with a job at admission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub template_id: String,
    pub params: serde_json::Value,
    pub quality: Quality,
    pub format: VideoFormat,
    pub session_id: Option<String>,
}
