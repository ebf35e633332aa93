use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::gate::{self, AdmissionLimits, Decision};
use super::gpu::GpuProbe;
use super::lifecycle;
use super::runner::Runner;
use super::templates::TemplateRegistry;
use crate::db::queries::{self, JobUpdate};
use crate::error::{Result, ServiceError};
use crate::models::job::{Job, JobStatus};
use crate::models::status::RUNNING_STATUSES;
use crate::models::template::RenderTemplate;

/// Strict-FIFO admission loop.
///
/// Each tick checks the resource gate, claims the oldest queued job with a
/// guarded `queued → starting` write and hands it to a [`Runner`] on its own
/// task. The tick never waits for a job to finish.
pub struct Scheduler {
    inner: Arc<Inner>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    db: SqlitePool,
    templates: Arc<TemplateRegistry>,
    gpu: GpuProbe,
    limits: AdmissionLimits,
    runner: Runner,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        db: SqlitePool,
        templates: Arc<TemplateRegistry>,
        gpu: GpuProbe,
        limits: AdmissionLimits,
        runner: Runner,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                templates,
                gpu,
                limits,
                runner,
                poll_interval,
            }),
            stop_tx: None,
            task: None,
        }
    }

    /// Spawn the tick loop. Calling it on a running scheduler does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        self.task = Some(tokio::spawn(inner.run_loop(stop_rx)));
        self.stop_tx = Some(stop_tx);
    }

    /// Stop ticking and wait for the loop to exit. Jobs already dispatched
    /// keep running on their own tasks.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Scheduler loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// One scheduling pass. Returns the dispatched job, if any.
    pub async fn tick(&self) -> Result<Option<Uuid>> {
        self.inner.tick().await
    }

    /// Gate check plus claim, without dispatching a runner.
    pub async fn claim_next(&self) -> Result<Option<(Job, RenderTemplate)>> {
        self.inner.claim_next().await
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        tracing::info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            max_concurrency = self.limits.max_concurrency,
            "Scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    async fn tick(&self) -> Result<Option<Uuid>> {
        let Some((job, template)) = self.claim_next().await? else {
            return Ok(None);
        };

        let job_id = job.id;
        metrics::counter!("render_jobs_dispatched_total").increment(1);
        tracing::info!(job_id = %job_id, template_id = %template.template_id, "Dispatching job");

        let runner = self.runner.clone();
        tokio::spawn(async move { runner.run(job, template).await });

        Ok(Some(job_id))
    }

    async fn claim_next(&self) -> Result<Option<(Job, RenderTemplate)>> {
        let gpu = self.gpu.query().await;
        let running = queries::count_by_status_in(&self.db, &RUNNING_STATUSES).await?;
        let running = usize::try_from(running).unwrap_or(usize::MAX);

        if let Decision::Deny(reason) = gate::admit(gpu.as_ref(), running, &self.limits) {
            tracing::debug!(reason = %reason, "Admission deferred");
            return Ok(None);
        }

        let Some(mut job) = queries::oldest_queued(&self.db).await? else {
            return Ok(None);
        };

        let Some(template) = self.templates.get(&job.template_id).cloned() else {
            tracing::warn!(job_id = %job.id, template_id = %job.template_id, "Queued job references an unknown template");
            let reason = ServiceError::TemplateNotFound(job.template_id.clone()).to_string();
            lifecycle::fail(&self.db, job.id, reason).await?;
            return Ok(None);
        };

        let started_at = Utc::now();
        let claim = JobUpdate {
            started_at: Some(started_at),
            ..JobUpdate::default()
        };
        let claimed = lifecycle::transition_from(
            &self.db,
            job.id,
            JobStatus::Queued,
            JobStatus::Starting,
            claim,
        )
        .await?;

        if !claimed {
            tracing::debug!(job_id = %job.id, "Job claimed by another tick");
            return Ok(None);
        }

        job.status = JobStatus::Starting;
        job.started_at = Some(started_at);
        Ok(Some((job, template)))
    }
}
