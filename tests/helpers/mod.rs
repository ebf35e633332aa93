//! Shared setup for the integration tests: an in-memory database, a fake
//! render engine and the template set it understands.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use mrq_server::db::{self, queries};
use mrq_server::models::job::{Job, JobStatus};
use mrq_server::models::template::RenderTemplate;
use mrq_server::services::gate::AdmissionLimits;
use mrq_server::services::gpu::GpuProbe;
use mrq_server::services::process::ProcessSupervisor;
use mrq_server::services::runner::{EngineSettings, Runner, RunnerSettings};
use mrq_server::services::scheduler::Scheduler;
use mrq_server::services::templates::TemplateRegistry;

/// Stand-in for the editor binary. The map path (`$1`) picks the behavior
/// and `-ABSLOG=` names the log it appends to.
const FAKE_ENGINE: &str = r#"#!/bin/sh
MODE="$1"
LOG=/dev/null
for a in "$@"; do
  case "$a" in
    -ABSLOG=*) LOG="${a#-ABSLOG=}" ;;
  esac
done
echo "LogInit: engine starting" >> "$LOG"
case "$MODE" in
  */exit0)
    exit 0 ;;
  */slow_exit0)
    sleep 1
    exit 0 ;;
  */fail)
    echo "LogWindows: Error: first problem" >> "$LOG"
    echo "LogShaders: Display: retrying" >> "$LOG"
    echo "LogWindows: Error: Assertion failed: shader compile" >> "$LOG"
    echo "LogExit: shutting down" >> "$LOG"
    exit 3 ;;
  */hang)
    sleep 30 ;;
  */tree)
    sleep 30 &
    echo $! > "$LOG.child"
    wait ;;
esac
"#;

/// Template ids understood by the fake engine.
pub const EXIT_CLEAN: &str = "exit0";
pub const SLOW_EXIT_CLEAN: &str = "slow_exit0";
pub const FAIL: &str = "fail";
pub const HANG: &str = "hang";
pub const TREE: &str = "tree";

pub struct TestEnv {
    pub pool: SqlitePool,
    pub templates: Arc<TemplateRegistry>,
    pub supervisor: ProcessSupervisor,
    pub script: PathBuf,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fake_engine.sh");
        std::fs::write(&script, FAKE_ENGINE).expect("write fake engine");

        Self {
            pool: memory_pool().await,
            templates: Arc::new(test_templates()),
            supervisor: ProcessSupervisor::new(),
            script,
            dir,
        }
    }

    pub fn data_root(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn runner_settings(&self, max_wait: Duration) -> RunnerSettings {
        RunnerSettings {
            engine: EngineSettings {
                editor_binary: PathBuf::from("/bin/sh"),
                uproject: self.script.clone(),
                executor_class: None,
            },
            data_root: self.data_root(),
            poll_interval: Duration::from_millis(50),
            max_wait,
            kill_grace: Duration::from_secs(1),
            log_tail_bytes: 8192,
        }
    }

    pub fn runner(&self, max_wait: Duration) -> Runner {
        Runner::new(
            self.pool.clone(),
            self.supervisor.clone(),
            self.runner_settings(max_wait),
        )
    }

    pub fn scheduler(&self, gpu: GpuProbe, max_concurrency: usize) -> Scheduler {
        Scheduler::new(
            self.pool.clone(),
            Arc::clone(&self.templates),
            gpu,
            AdmissionLimits {
                max_concurrency,
                min_free_vram_mb: 4096,
            },
            self.runner(Duration::from_secs(10)),
            Duration::from_millis(50),
        )
    }

    pub fn template(&self, template_id: &str) -> RenderTemplate {
        self.templates
            .get(template_id)
            .cloned()
            .expect("known test template")
    }
}

/// A private in-memory database. One connection, kept for the whole test,
/// so every query sees the same schema.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").expect("sqlite url");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("open in-memory database");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub fn test_templates() -> TemplateRegistry {
    let templates = [EXIT_CLEAN, SLOW_EXIT_CLEAN, FAIL, HANG, TREE]
        .into_iter()
        .map(|id| RenderTemplate {
            template_id: id.to_string(),
            template_name: format!("Fake {id}"),
            template_desc: String::new(),
            template_thumbnail: None,
            map_path: Some(format!("/Game/{id}")),
            level_sequence: Some(format!("/Game/Seq/{id}.{id}")),
        })
        .collect();
    TemplateRegistry::from_templates(templates)
}

/// Insert a queued job for `template_id`.
pub async fn queued_job(pool: &SqlitePool, template_id: &str) -> Job {
    let payload = serde_json::json!({
        "template_id": template_id,
        "params": {"camera": "drone"},
        "quality": "HIGH",
        "format": "mp4",
        "session_id": null,
    });
    let job = Job::new(template_id, Some("session-1".to_string()), payload.to_string());
    queries::insert_job(pool, &job).await.expect("insert job");
    job
}

/// Insert a job and force it into `status`, bypassing the state machine.
pub async fn job_in_status(pool: &SqlitePool, template_id: &str, status: JobStatus) -> Job {
    let job = queued_job(pool, template_id).await;
    sqlx::query("UPDATE jobs SET status = ? WHERE job_id = ?")
        .bind(status.to_string())
        .bind(job.id.to_string())
        .execute(pool)
        .await
        .expect("force status");
    fetch(pool, job.id).await
}

pub async fn fetch(pool: &SqlitePool, job_id: Uuid) -> Job {
    queries::get_job(pool, job_id)
        .await
        .expect("query job")
        .expect("job exists")
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_terminal(pool: &SqlitePool, job_id: Uuid, timeout: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = fetch(pool, job_id).await;
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} still {} after {timeout:?}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Poll until `path` exists and holds a pid.
pub async fn wait_for_pid_file(path: &Path, timeout: Duration) -> u32 {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(raw) = tokio::fs::read_to_string(path).await {
            if let Ok(pid) = raw.trim().parse() {
                return pid;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no pid written to {}",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Poll until the runner has recorded the engine pid on the job.
pub async fn wait_for_recorded_pid(pool: &SqlitePool, job_id: Uuid, timeout: Duration) -> u32 {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(pid) = fetch(pool, job_id).await.pid {
            return pid;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} never recorded a pid"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
