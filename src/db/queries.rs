use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::job::{Job, JobArtifacts, JobStatus};

macro_rules! select_job {
    ($tail:literal) => {
        concat!(
            r#"
            SELECT j.job_id, j.session_id, j.template_id, j.status, j.payload,
                   j.progress_percent, j.progress_eta_seconds, j.pid, j.error,
                   j.created_at, j.updated_at, j.started_at, j.ended_at,
                   a.job_id AS artifact_job_id, a.video_path, a.video_url,
                   a.ue_log
            FROM jobs j
            LEFT JOIN job_artifacts a ON a.job_id = j.job_id
            "#,
            $tail
        )
    };
}

/// Targeted field update. Only `Some` fields are written; `started_at` and
/// `ended_at` keep their first value once set. `clear_pid` writes NULL and
/// wins over `pid`.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub pid: Option<u32>,
    pub clear_pid: bool,
    pub progress_percent: Option<f64>,
    pub progress_eta_seconds: Option<i64>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn ended_now(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn without_pid(mut self) -> Self {
        self.clear_pid = true;
        self
    }
}

/// Insert a new job record.
pub async fn insert_job(pool: &SqlitePool, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, session_id, template_id, status, payload,
                          progress_percent, progress_eta_seconds, pid, error,
                          created_at, updated_at, started_at, ended_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(&job.session_id)
    .bind(&job.template_id)
    .bind(job.status.to_string())
    .bind(&job.payload)
    .bind(job.progress_percent)
    .bind(job.progress_eta_seconds)
    .bind(job.pid.map(i64::from))
    .bind(&job.error)
    .bind(job.created_at)
    .bind(job.updated_at)
    .bind(job.started_at)
    .bind(job.ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID, with its artifacts record when one exists.
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(select_job!("WHERE j.job_id = ?"))
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Apply `update` to the job only if its current status is one of
/// `expected`. An empty `expected` guards on the identifier alone.
///
/// Returns whether a row was changed.
pub async fn conditional_update(
    pool: &SqlitePool,
    job_id: Uuid,
    expected: &[JobStatus],
    update: &JobUpdate,
) -> Result<bool, sqlx::Error> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE jobs SET updated_at = ");
    qb.push_bind(Utc::now());

    if let Some(status) = update.status {
        qb.push(", status = ").push_bind(status.to_string());
    }
    if update.clear_pid {
        qb.push(", pid = NULL");
    } else if let Some(pid) = update.pid {
        qb.push(", pid = ").push_bind(i64::from(pid));
    }
    if let Some(percent) = update.progress_percent {
        qb.push(", progress_percent = ").push_bind(percent);
    }
    if let Some(eta) = update.progress_eta_seconds {
        qb.push(", progress_eta_seconds = ").push_bind(eta);
    }
    if let Some(error) = &update.error {
        qb.push(", error = ").push_bind(error.clone());
    }
    if let Some(started) = update.started_at {
        qb.push(", started_at = COALESCE(started_at, ")
            .push_bind(started)
            .push(")");
    }
    if let Some(ended) = update.ended_at {
        qb.push(", ended_at = COALESCE(ended_at, ")
            .push_bind(ended)
            .push(")");
    }

    qb.push(" WHERE job_id = ").push_bind(job_id.to_string());

    if !expected.is_empty() {
        qb.push(" AND status IN (");
        let mut statuses = qb.separated(", ");
        for status in expected {
            statuses.push_bind(status.to_string());
        }
        statuses.push_unseparated(")");
    }

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected() == 1)
}

/// All queued jobs, oldest first (insertion order breaks ties).
pub async fn list_queued_ordered_by_creation(pool: &SqlitePool) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query(select_job!(
        "WHERE j.status = 'queued' ORDER BY j.created_at ASC, j.rowid ASC"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// The next job the scheduler should consider.
pub async fn oldest_queued(pool: &SqlitePool) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(select_job!(
        "WHERE j.status = 'queued' ORDER BY j.created_at ASC, j.rowid ASC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Count jobs whose status is in `statuses`.
pub async fn count_by_status_in(
    pool: &SqlitePool,
    statuses: &[JobStatus],
) -> Result<i64, sqlx::Error> {
    if statuses.is_empty() {
        return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs WHERE status IN (");
    let mut separated = qb.separated(", ");
    for status in statuses {
        separated.push_bind(status.to_string());
    }
    separated.push_unseparated(")");

    qb.build_query_scalar::<i64>().fetch_one(pool).await
}

/// 1-based FIFO position of a job among the queued jobs.
pub async fn queue_position(pool: &SqlitePool, job_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM jobs q, jobs t
        WHERE t.job_id = ?
          AND q.status = 'queued'
          AND (q.created_at < t.created_at
               OR (q.created_at = t.created_at AND q.rowid <= t.rowid))
        "#,
    )
    .bind(job_id.to_string())
    .fetch_one(pool)
    .await
}

/// Create the artifacts record if absent and set the provided fields.
/// `None` fields keep whatever another writer stored.
pub async fn upsert_artifacts(
    pool: &SqlitePool,
    job_id: Uuid,
    artifacts: &JobArtifacts,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_artifacts (job_id, video_path, video_url, ue_log)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (job_id) DO UPDATE SET
            video_path = COALESCE(excluded.video_path, job_artifacts.video_path),
            video_url  = COALESCE(excluded.video_url, job_artifacts.video_url),
            ue_log     = COALESCE(excluded.ue_log, job_artifacts.ue_log)
        "#,
    )
    .bind(job_id.to_string())
    .bind(&artifacts.video_path)
    .bind(&artifacts.video_url)
    .bind(&artifacts.ue_log)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE jobs SET updated_at = ? WHERE job_id = ?")
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

fn job_from_row(row: &SqliteRow) -> Result<Job, sqlx::Error> {
    let id: String = row.try_get("job_id")?;
    let status: String = row.try_get("status")?;
    let pid: Option<i64> = row.try_get("pid")?;
    let artifact_job_id: Option<String> = row.try_get("artifact_job_id")?;

    let artifacts = match artifact_job_id {
        Some(_) => Some(JobArtifacts {
            video_path: row.try_get("video_path")?,
            video_url: row.try_get("video_url")?,
            ue_log: row.try_get("ue_log")?,
        }),
        None => None,
    };

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| column_error("job_id", e))?,
        session_id: row.try_get("session_id")?,
        template_id: row.try_get("template_id")?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| column_error("status", e))?,
        payload: row.try_get("payload")?,
        progress_percent: row.try_get("progress_percent")?,
        progress_eta_seconds: row.try_get("progress_eta_seconds")?,
        pid: pid.and_then(|p| u32::try_from(p).ok()),
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        artifacts,
    })
}

fn column_error<E>(column: &str, source: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}
