//! Admission and claiming.

mod helpers;

use std::time::Duration;

use helpers::*;
use mrq_server::db::queries;
use mrq_server::models::job::JobStatus;
use mrq_server::services::gpu::{GpuProbe, GpuStatus};
use mrq_server::services::lifecycle;

#[tokio::test]
async fn test_claims_oldest_queued_first() {
    let env = TestEnv::new().await;
    let first = queued_job(&env.pool, EXIT_CLEAN).await;
    let second = queued_job(&env.pool, EXIT_CLEAN).await;
    let scheduler = env.scheduler(GpuProbe::Disabled, 1);

    let (claimed, template) = scheduler.claim_next().await.unwrap().expect("a claim");
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, JobStatus::Starting);
    assert_eq!(template.template_id, EXIT_CLEAN);

    let stored = fetch(&env.pool, first.id).await;
    assert_eq!(stored.status, JobStatus::Starting);
    assert!(stored.started_at.is_some());

    // Concurrency limit of one is now taken.
    assert!(scheduler.claim_next().await.unwrap().is_none());
    assert_eq!(fetch(&env.pool, second.id).await.status, JobStatus::Queued);

    lifecycle::fail(&env.pool, first.id, "done with it").await.unwrap();

    let (claimed, _) = scheduler.claim_next().await.unwrap().expect("second claim");
    assert_eq!(claimed.id, second.id);
}

#[tokio::test]
async fn test_uploading_jobs_free_their_slot() {
    let env = TestEnv::new().await;
    job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Uploading).await;
    let queued = queued_job(&env.pool, EXIT_CLEAN).await;
    let scheduler = env.scheduler(GpuProbe::Disabled, 1);

    let (claimed, _) = scheduler.claim_next().await.unwrap().expect("a claim");
    assert_eq!(claimed.id, queued.id);
}

#[tokio::test]
async fn test_concurrent_claims_take_a_job_once() {
    let env = TestEnv::new().await;
    let job = queued_job(&env.pool, EXIT_CLEAN).await;
    let scheduler = env.scheduler(GpuProbe::Disabled, 4);

    let (a, b) = futures::join!(scheduler.claim_next(), scheduler.claim_next());
    let claims: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].0.id, job.id);
    assert_eq!(
        queries::count_by_status_in(&env.pool, &[JobStatus::Starting])
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_low_gpu_memory_defers_admission() {
    let env = TestEnv::new().await;
    let job = queued_job(&env.pool, EXIT_CLEAN).await;
    let gpu = GpuProbe::Static(GpuStatus {
        total_mb: 8192,
        used_mb: 7192,
        free_mb: 1000,
    });
    let scheduler = env.scheduler(gpu, 2);

    assert!(scheduler.claim_next().await.unwrap().is_none());
    assert_eq!(fetch(&env.pool, job.id).await.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_unknown_template_fails_the_job() {
    let env = TestEnv::new().await;
    let orphan = queued_job(&env.pool, "deleted_template").await;
    let scheduler = env.scheduler(GpuProbe::Disabled, 2);

    assert!(scheduler.claim_next().await.unwrap().is_none());

    let stored = fetch(&env.pool, orphan.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("deleted_template"));
    assert!(stored.ended_at.is_some());
}

#[tokio::test]
async fn test_tick_dispatches_a_runner() {
    let env = TestEnv::new().await;
    let job = queued_job(&env.pool, FAIL).await;
    let scheduler = env.scheduler(GpuProbe::Disabled, 2);

    let dispatched = tokio_test::assert_ok!(scheduler.tick().await);
    assert_eq!(dispatched, Some(job.id));

    let settled = wait_for_terminal(&env.pool, job.id, Duration::from_secs(10)).await;
    assert_eq!(settled.status, JobStatus::Failed);
    assert!(settled.pid.is_none());

    assert_eq!(tokio_test::assert_ok!(scheduler.tick().await), None);
}

#[tokio::test]
async fn test_background_loop_drains_queue() {
    let env = TestEnv::new().await;
    let first = queued_job(&env.pool, FAIL).await;
    let second = queued_job(&env.pool, FAIL).await;
    let mut scheduler = env.scheduler(GpuProbe::Disabled, 1);

    scheduler.start();
    assert!(scheduler.is_running());

    let first = wait_for_terminal(&env.pool, first.id, Duration::from_secs(10)).await;
    let second = wait_for_terminal(&env.pool, second.id, Duration::from_secs(10)).await;
    assert!(first.started_at.unwrap() <= second.started_at.unwrap());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}
