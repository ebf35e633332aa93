//! Status writes pushed by the render engine, plus the cancel path.
//!
//! Every write here goes through the same guarded transitions the runner
//! uses, so an engine callback racing the runner's failure handling either
//! lands on the status it validated against or is re-validated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::lifecycle;
use super::process::ProcessSupervisor;
use crate::db::queries::{self, JobUpdate};
use crate::error::{Result, ServiceError};
use crate::models::api::{EncodingStatusUpdate, ProgressUpdate, RenderComplete};
use crate::models::job::{Job, JobArtifacts, JobStatus};
use crate::models::status::parse_status;

async fn load(pool: &SqlitePool, job_id: Uuid) -> Result<Job> {
    queries::get_job(pool, job_id)
        .await?
        .ok_or(ServiceError::JobNotFound(job_id))
}

fn parse_pushed_status(raw: &str) -> Result<JobStatus> {
    parse_status(raw).ok_or_else(|| ServiceError::InvalidStatus(raw.to_string()))
}

/// Apply a progress push. A status equal to the current one only updates
/// the progress fields; progress sent for a settled job is ignored.
pub async fn apply_progress(pool: &SqlitePool, job_id: Uuid, update: ProgressUpdate) -> Result<Job> {
    let job = load(pool, job_id).await?;
    let pushed = update.status.as_deref().map(parse_pushed_status).transpose()?;

    let mut fields = JobUpdate {
        progress_percent: update.progress_percent,
        progress_eta_seconds: update.eta_seconds,
        ..JobUpdate::default()
    };

    match pushed {
        Some(next) if next != job.status => {
            if next == JobStatus::Completed {
                fields.ended_at = Some(Utc::now());
            }
            let job = lifecycle::transition(pool, job_id, next, fields).await?;
            tracing::info!(job_id = %job_id, status = %next, "Engine pushed status");
            Ok(job)
        }
        _ => {
            if job.status.is_terminal() {
                tracing::debug!(job_id = %job_id, status = %job.status, "Progress for settled job ignored");
                return Ok(job);
            }
            queries::conditional_update(pool, job_id, &[job.status], &fields).await?;
            load(pool, job_id).await
        }
    }
}

/// Mark the render finished and record where the movie landed.
pub async fn apply_render_complete(
    pool: &SqlitePool,
    job_id: Uuid,
    body: RenderComplete,
) -> Result<Job> {
    let fields = JobUpdate::default().ended_now();
    lifecycle::advance_to(pool, job_id, JobStatus::Completed, fields).await?;

    let video_path = match (body.video_path, body.video_directory) {
        (Some(path), _) => Some(path),
        (None, Some(dir)) => find_video_file(Path::new(&dir))
            .await
            .map(|p| p.display().to_string()),
        (None, None) => None,
    };

    if video_path.is_none() {
        tracing::warn!(job_id = %job_id, "Render completed without a resolvable video file");
    }

    let artifacts = JobArtifacts {
        video_path,
        ..JobArtifacts::default()
    };
    queries::upsert_artifacts(pool, job_id, &artifacts).await?;

    tracing::info!(job_id = %job_id, "Render complete");
    load(pool, job_id).await
}

/// Apply an encoding or upload status push from the engine.
pub async fn apply_encoding_status(
    pool: &SqlitePool,
    job_id: Uuid,
    body: EncodingStatusUpdate,
) -> Result<Job> {
    let next = parse_pushed_status(&body.status)?;

    let mut fields = JobUpdate::default();
    if next == JobStatus::Completed {
        fields.progress_percent = Some(100.0);
        fields.ended_at = Some(Utc::now());
    }

    lifecycle::advance_to(pool, job_id, next, fields).await?;

    if next == JobStatus::Completed {
        let artifacts = JobArtifacts {
            video_url: body.video_url,
            ..JobArtifacts::default()
        };
        queries::upsert_artifacts(pool, job_id, &artifacts).await?;
    }

    tracing::info!(job_id = %job_id, status = %next, "Encoding status updated");
    load(pool, job_id).await
}

/// First `.mp4` directly inside `dir`, else the first `.mov`. Enumeration
/// order is whatever the filesystem returns. Unreadable directories yield
/// `None`.
pub async fn find_video_file(dir: &Path) -> Option<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Could not read video directory");
            return None;
        }
    };

    let mut first_mov = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp4") => return Some(path),
            Some("mov") if first_mov.is_none() => first_mov = Some(path),
            _ => {}
        }
    }
    first_mov
}

/// Cancel a job: `canceling`, stop its process tree, then `canceled`.
///
/// Termination is best effort; the job ends `canceled` either way.
pub async fn cancel(
    pool: &SqlitePool,
    supervisor: &ProcessSupervisor,
    job_id: Uuid,
    grace: Duration,
) -> Result<Job> {
    let job = load(pool, job_id).await?;
    if job.status.is_terminal() {
        return Err(ServiceError::NotCancelable {
            job_id,
            status: job.status,
        });
    }

    let job = if job.status == JobStatus::Canceling {
        job
    } else {
        match lifecycle::transition(pool, job_id, JobStatus::Canceling, JobUpdate::default()).await
        {
            Ok(job) => job,
            Err(ServiceError::InvalidTransition { from, .. }) => {
                return Err(ServiceError::NotCancelable {
                    job_id,
                    status: from,
                })
            }
            Err(e) => return Err(e),
        }
    };

    tracing::info!(job_id = %job_id, pid = ?job.pid, "Canceling job");

    if let Some(pid) = job.pid {
        supervisor.terminate(pid, grace).await;
    }

    let settled = lifecycle::transition_from(
        pool,
        job_id,
        JobStatus::Canceling,
        JobStatus::Canceled,
        JobUpdate::default().ended_now().without_pid(),
    )
    .await?;

    if settled {
        metrics::counter!("render_jobs_canceled_total").increment(1);
        tracing::info!(job_id = %job_id, "Job canceled");
    }

    load(pool, job_id).await
}
