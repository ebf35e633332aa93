//! Per-job render supervision.
//!
//! A runner owns one engine process from launch to exit. Two sources write
//! the job's status while it runs: this loop, from what it sees of the local
//! process, and the engine's own HTTP callbacks. The engine is authoritative
//! for the encoding/uploading/completed stages; the runner only decides on
//! failure, and every write it makes is guarded by the status it expects.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use super::command::build_render_command;
use super::lifecycle;
use super::process::{ProcessHandle, ProcessState, ProcessSupervisor};
use crate::db::queries::{self, JobUpdate};
use crate::error::{Result, ServiceError};
use crate::models::job::{Job, JobArtifacts, JobStatus};
use crate::models::template::RenderTemplate;

/// How to invoke the render engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub editor_binary: PathBuf,
    pub uproject: PathBuf,
    pub executor_class: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub engine: EngineSettings,
    pub data_root: PathBuf,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Grace period when the runner itself has to kill a stuck engine.
    pub kill_grace: Duration,
    pub log_tail_bytes: u64,
}

/// Drives claimed jobs to a terminal state. Cheap to clone; one `run` call
/// per job, each on its own task.
#[derive(Debug, Clone)]
pub struct Runner {
    db: SqlitePool,
    supervisor: ProcessSupervisor,
    settings: Arc<RunnerSettings>,
}

impl Runner {
    pub fn new(db: SqlitePool, supervisor: ProcessSupervisor, settings: RunnerSettings) -> Self {
        Self {
            db,
            supervisor,
            settings: Arc::new(settings),
        }
    }

    /// Directory holding the engine log of `job_id`.
    pub fn logs_dir(&self, job_id: Uuid) -> PathBuf {
        self.settings
            .data_root
            .join("jobs")
            .join(job_id.to_string())
            .join("logs")
    }

    /// Run `job` (already claimed into `starting`) until it settles.
    ///
    /// Never returns an error: whatever goes wrong is recorded on the job.
    pub async fn run(&self, job: Job, template: RenderTemplate) {
        let job_id = job.id;
        let started = Instant::now();
        metrics::gauge!("render_jobs_running").increment(1.0);

        tracing::info!(job_id = %job_id, template_id = %template.template_id, "Runner started");

        if let Err(e) = self.drive(&job, &template).await {
            tracing::error!(job_id = %job_id, error = %e, "Render supervision failed");
            if let Err(write_err) = lifecycle::fail(&self.db, job_id, failure_reason(&e)).await {
                tracing::error!(job_id = %job_id, error = %write_err, "Could not record job failure");
            }
        }

        metrics::gauge!("render_jobs_running").decrement(1.0);
        metrics::histogram!("render_job_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            job_id = %job_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Runner finished"
        );
    }

    async fn drive(&self, job: &Job, template: &RenderTemplate) -> Result<()> {
        let logs_dir = self.logs_dir(job.id);
        tokio::fs::create_dir_all(&logs_dir).await?;
        let logs_dir = tokio::fs::canonicalize(&logs_dir).await?;
        let log_path = logs_dir.join(format!("ue_{}.log", job.id));

        let command = build_render_command(
            &self.settings.engine,
            template,
            job.id,
            &job.payload,
            &log_path,
        )?;

        tracing::info!(
            job_id = %job.id,
            program = %command.program.display(),
            args = ?command.args,
            "Launching render engine"
        );

        let started = Instant::now();
        let mut handle = self.supervisor.start(&command).await?;
        let pid = handle.pid().ok_or_else(|| {
            ServiceError::Spawn(std::io::Error::other("process exited before reporting a pid"))
        })?;

        let live = [
            JobStatus::Starting,
            JobStatus::Rendering,
            JobStatus::Encoding,
            JobStatus::Uploading,
        ];
        let pid_update = JobUpdate {
            pid: Some(pid),
            ..JobUpdate::default()
        };
        if !queries::conditional_update(&self.db, job.id, &live, &pid_update).await? {
            tracing::warn!(job_id = %job.id, pid, "Job settled before the engine came up, stopping it");
            self.supervisor.terminate(pid, self.settings.kill_grace).await;
            return Ok(());
        }

        if lifecycle::transition_from(
            &self.db,
            job.id,
            JobStatus::Starting,
            JobStatus::Rendering,
            JobUpdate::default(),
        )
        .await?
        {
            tracing::info!(job_id = %job.id, pid, "Job rendering");
        } else {
            tracing::debug!(job_id = %job.id, "Engine already reported a later stage");
        }

        self.watch(job.id, pid, &mut handle, &log_path, started).await
    }

    async fn watch(
        &self,
        job_id: Uuid,
        pid: u32,
        handle: &mut ProcessHandle,
        log_path: &Path,
        started: Instant,
    ) -> Result<()> {
        let mut last_seen = JobStatus::Rendering;

        loop {
            if let ProcessState::Exited(code) = self.supervisor.poll(handle)? {
                tracing::info!(job_id = %job_id, pid, code = ?code, "Render process exited");
                return self.on_exit(job_id, code, log_path).await;
            }

            if started.elapsed() >= self.settings.max_wait {
                return self.on_timeout(job_id, pid, log_path).await;
            }

            // External stages are observed, never acted on: only the
            // process exit ends the watch.
            if let Some(current) = queries::get_job(&self.db, job_id).await? {
                if current.status != last_seen {
                    tracing::info!(
                        job_id = %job_id,
                        status = %current.status,
                        progress = current.progress_percent,
                        "Engine reported stage"
                    );
                    last_seen = current.status;
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn on_exit(&self, job_id: Uuid, code: Option<i32>, log_path: &Path) -> Result<()> {
        let current = queries::get_job(&self.db, job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        if matches!(current.status, JobStatus::Canceling | JobStatus::Canceled) {
            tracing::info!(job_id = %job_id, "Process exit follows cancellation, leaving status to the cancel path");
            return Ok(());
        }

        self.release_pid(job_id).await?;
        self.record_log_path(job_id, log_path).await?;

        if code == Some(0) {
            if matches!(
                current.status,
                JobStatus::Queued | JobStatus::Starting | JobStatus::Rendering
            ) {
                tracing::warn!(
                    job_id = %job_id,
                    status = %current.status,
                    "Engine exited cleanly without reporting completion"
                );
                return lifecycle::fail(
                    &self.db,
                    job_id,
                    ServiceError::ExternalSignalConflict.to_string(),
                )
                .await;
            }

            let stamp = JobUpdate {
                ended_at: Some(Utc::now()),
                ..JobUpdate::default()
            };
            queries::conditional_update(&self.db, job_id, &[], &stamp).await?;
            if current.status.is_running() {
                tracing::warn!(
                    job_id = %job_id,
                    status = %current.status,
                    "Render process finished but the job still holds a running slot until the engine reports again"
                );
            } else {
                tracing::info!(job_id = %job_id, status = %current.status, "Render process finished");
            }
            return Ok(());
        }

        let reason = match read_log_tail(log_path, self.settings.log_tail_bytes).await {
            Some(tail) => tail,
            None => format!("render process exited with code {code:?}"),
        };
        lifecycle::fail(&self.db, job_id, reason).await
    }

    async fn on_timeout(&self, job_id: Uuid, pid: u32, log_path: &Path) -> Result<()> {
        let timeout = ServiceError::Timeout(self.settings.max_wait);
        tracing::warn!(job_id = %job_id, pid, "Render exceeded its time limit, terminating");

        self.supervisor.terminate(pid, self.settings.kill_grace).await;
        self.release_pid(job_id).await?;
        self.record_log_path(job_id, log_path).await?;

        let reason = match read_log_tail(log_path, self.settings.log_tail_bytes).await {
            Some(tail) => format!("{timeout}\n{tail}"),
            None => timeout.to_string(),
        };
        lifecycle::fail(&self.db, job_id, reason).await
    }

    /// The process is gone; its pid may be reused by the OS.
    async fn release_pid(&self, job_id: Uuid) -> Result<()> {
        let update = JobUpdate::default().without_pid();
        queries::conditional_update(&self.db, job_id, &[], &update).await?;
        Ok(())
    }

    async fn record_log_path(&self, job_id: Uuid, log_path: &Path) -> Result<()> {
        let artifacts = JobArtifacts {
            ue_log: Some(log_path.display().to_string()),
            ..JobArtifacts::default()
        };
        queries::upsert_artifacts(&self.db, job_id, &artifacts).await?;
        Ok(())
    }
}

/// Text recorded on the job. Storage and I/O internals stay in the logs.
fn failure_reason(err: &ServiceError) -> String {
    match err {
        ServiceError::Database(_) | ServiceError::Io(_) | ServiceError::Conflict(_) => {
            "internal error while supervising the render".to_string()
        }
        other => other.to_string(),
    }
}

/// Read the last `max_bytes` of the engine log, trimmed by
/// [`trim_to_last_error`]. `None` when the log is missing or empty.
pub async fn read_log_tail(path: &Path, max_bytes: u64) -> Option<String> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let offset = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(offset)).await.ok()?;

    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf).await.ok()?;
    let lossy = String::from_utf8_lossy(&buf);
    let mut text: &str = &lossy;

    // Drop the partial first line when reading from the middle of the file.
    if offset > 0 {
        if let Some((_, rest)) = text.split_once('\n') {
            text = rest;
        }
    }

    let trimmed = trim_to_last_error(text);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Start `text` at its most recent line carrying an error marker. Without
/// any marker the whole text is kept.
pub fn trim_to_last_error(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    match lines.iter().rposition(|line| is_error_line(line)) {
        Some(index) => lines[index..].join("\n").trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error") || lower.contains("fatal")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_to_last_error() {
        let log = "LogInit: boot\nLogTemp: Error: first\nLogTemp: ok\nLogTemp: Fatal error: crash\nLogExit: bye\n";
        assert_eq!(
            trim_to_last_error(log),
            "LogTemp: Fatal error: crash\nLogExit: bye"
        );
    }

    #[test]
    fn test_trim_without_marker_keeps_everything() {
        assert_eq!(trim_to_last_error("  line one\nline two\n"), "line one\nline two");
    }

    #[tokio::test]
    async fn test_read_log_tail_missing_file() {
        assert!(read_log_tail(Path::new("/nonexistent/ue.log"), 1024).await.is_none());
    }

    #[test]
    fn test_failure_reason_hides_internals() {
        let reason = failure_reason(&ServiceError::Io(std::io::Error::other("disk on fire")));
        assert!(!reason.contains("disk on fire"));
        assert_eq!(
            failure_reason(&ServiceError::ExternalSignalConflict),
            ServiceError::ExternalSignalConflict.to_string()
        );
    }
}
