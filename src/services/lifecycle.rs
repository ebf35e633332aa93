use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::queries::{self, JobUpdate};
use crate::error::{Result, ServiceError};
use crate::models::job::{Job, JobStatus};

const MAX_CAS_ATTEMPTS: usize = 5;

/// Move a job to `next`, writing `fields` alongside the status.
///
/// The write is guarded by the status observed just before it, so a
/// concurrent writer that got in first makes the guard miss; the job is then
/// re-read and the move re-validated against the new status.
pub async fn transition(
    pool: &SqlitePool,
    job_id: Uuid,
    next: JobStatus,
    fields: JobUpdate,
) -> Result<Job> {
    let update = JobUpdate {
        status: Some(next),
        ..fields
    };

    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let job = queries::get_job(pool, job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        if !job.status.can_transition(next) {
            return Err(ServiceError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }

        if queries::conditional_update(pool, job_id, &[job.status], &update).await? {
            tracing::debug!(job_id = %job_id, from = %job.status, to = %next, "Job transitioned");
            return queries::get_job(pool, job_id)
                .await?
                .ok_or(ServiceError::JobNotFound(job_id));
        }

        tracing::debug!(job_id = %job_id, attempt, "Status changed underneath transition, retrying");
    }

    Err(ServiceError::Conflict(job_id))
}

/// Move a job out of a status the caller already knows it was in.
///
/// Returns `false` when the job has since left `from`; nothing is written
/// in that case.
pub async fn transition_from(
    pool: &SqlitePool,
    job_id: Uuid,
    from: JobStatus,
    next: JobStatus,
    fields: JobUpdate,
) -> Result<bool> {
    if !from.can_transition(next) {
        return Err(ServiceError::InvalidTransition { from, to: next });
    }

    let update = JobUpdate {
        status: Some(next),
        ..fields
    };
    Ok(queries::conditional_update(pool, job_id, &[from], &update).await?)
}

/// Like [`transition`], but a job already sitting in `next` is left alone
/// and only receives the non-status fields.
pub async fn advance_to(
    pool: &SqlitePool,
    job_id: Uuid,
    next: JobStatus,
    fields: JobUpdate,
) -> Result<Job> {
    let job = queries::get_job(pool, job_id)
        .await?
        .ok_or(ServiceError::JobNotFound(job_id))?;

    if job.status != next {
        return transition(pool, job_id, next, fields).await;
    }

    let update = JobUpdate {
        status: None,
        ..fields
    };
    queries::conditional_update(pool, job_id, &[next], &update).await?;
    queries::get_job(pool, job_id)
        .await?
        .ok_or(ServiceError::JobNotFound(job_id))
}

/// Record a job-level failure. Losing to a terminal or canceling state
/// written by someone else is not an error for the caller.
pub async fn fail(pool: &SqlitePool, job_id: Uuid, reason: impl Into<String>) -> Result<()> {
    let reason = reason.into();
    let fields = JobUpdate::default().with_error(reason.clone()).ended_now();
    match transition(pool, job_id, JobStatus::Failed, fields).await {
        Ok(_) => {
            metrics::counter!("render_jobs_failed_total").increment(1);
            tracing::warn!(job_id = %job_id, reason = %reason, "Job failed");
            Ok(())
        }
        Err(ServiceError::InvalidTransition { from, .. }) => {
            tracing::info!(
                job_id = %job_id,
                status = %from,
                "Job already settled elsewhere, failure not recorded"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}
