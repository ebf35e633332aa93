//! Repository-backed status transitions.

mod helpers;

use helpers::*;
use mrq_server::db::queries::{self, JobUpdate};
use mrq_server::error::ServiceError;
use mrq_server::models::job::{JobArtifacts, JobStatus};
use mrq_server::services::lifecycle;
use uuid::Uuid;

#[tokio::test]
async fn test_transition_writes_status_and_fields() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Rendering).await;

    let updated = lifecycle::transition(
        &env.pool,
        job.id,
        JobStatus::Encoding,
        JobUpdate {
            progress_percent: Some(70.0),
            ..JobUpdate::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(updated.status, JobStatus::Encoding);
    assert_eq!(updated.progress_percent, 70.0);
    assert!(updated.updated_at >= job.updated_at);
}

#[tokio::test]
async fn test_illegal_transition_leaves_job_untouched() {
    let env = TestEnv::new().await;
    let job = queued_job(&env.pool, EXIT_CLEAN).await;

    let err = lifecycle::transition(&env.pool, job.id, JobStatus::Rendering, JobUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));
    assert_eq!(fetch(&env.pool, job.id).await.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_transition_unknown_job() {
    let env = TestEnv::new().await;
    let err = lifecycle::transition(
        &env.pool,
        Uuid::new_v4(),
        JobStatus::Failed,
        JobUpdate::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::JobNotFound(_)));
}

#[tokio::test]
async fn test_guarded_update_misses_on_stale_status() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Encoding).await;

    let changed = queries::conditional_update(
        &env.pool,
        job.id,
        &[JobStatus::Rendering],
        &JobUpdate::status(JobStatus::Failed),
    )
    .await
    .unwrap();
    assert!(!changed);

    let moved = lifecycle::transition_from(
        &env.pool,
        job.id,
        JobStatus::Rendering,
        JobStatus::Failed,
        JobUpdate::default(),
    )
    .await
    .unwrap();
    assert!(!moved);
    assert_eq!(fetch(&env.pool, job.id).await.status, JobStatus::Encoding);
}

#[tokio::test]
async fn test_fail_after_terminal_is_quiet() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Completed).await;

    tokio_test::assert_ok!(lifecycle::fail(&env.pool, job.id, "too late").await);

    let stored = fetch(&env.pool, job.id).await;
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn test_fail_records_reason_once() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Rendering).await;

    lifecycle::fail(&env.pool, job.id, "first").await.unwrap();
    let first_end = fetch(&env.pool, job.id).await.ended_at;
    lifecycle::fail(&env.pool, job.id, "second").await.unwrap();

    let stored = fetch(&env.pool, job.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("first"));
    assert_eq!(stored.ended_at, first_end);
}

#[tokio::test]
async fn test_advance_to_current_status_updates_fields_only() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Uploading).await;

    let updated = lifecycle::advance_to(
        &env.pool,
        job.id,
        JobStatus::Uploading,
        JobUpdate {
            progress_percent: Some(99.0),
            ..JobUpdate::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.status, JobStatus::Uploading);
    assert_eq!(updated.progress_percent, 99.0);
}

#[tokio::test]
async fn test_queue_position_and_ordering() {
    let env = TestEnv::new().await;
    let a = queued_job(&env.pool, EXIT_CLEAN).await;
    let b = queued_job(&env.pool, EXIT_CLEAN).await;
    let c = queued_job(&env.pool, EXIT_CLEAN).await;

    assert_eq!(queries::queue_position(&env.pool, a.id).await.unwrap(), 1);
    assert_eq!(queries::queue_position(&env.pool, c.id).await.unwrap(), 3);

    lifecycle::fail(&env.pool, a.id, "gone").await.unwrap();
    assert_eq!(queries::queue_position(&env.pool, b.id).await.unwrap(), 1);

    let queued = queries::list_queued_ordered_by_creation(&env.pool).await.unwrap();
    let ids: Vec<_> = queued.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![b.id, c.id]);
}

#[tokio::test]
async fn test_artifacts_upsert_keeps_existing_fields() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Rendering).await;

    queries::upsert_artifacts(
        &env.pool,
        job.id,
        &JobArtifacts {
            ue_log: Some("/logs/ue.log".to_string()),
            ..JobArtifacts::default()
        },
    )
    .await
    .unwrap();
    queries::upsert_artifacts(
        &env.pool,
        job.id,
        &JobArtifacts {
            video_url: Some("https://cdn/x.mp4".to_string()),
            ..JobArtifacts::default()
        },
    )
    .await
    .unwrap();

    let artifacts = fetch(&env.pool, job.id).await.artifacts.unwrap();
    assert_eq!(artifacts.ue_log.as_deref(), Some("/logs/ue.log"));
    assert_eq!(artifacts.video_url.as_deref(), Some("https://cdn/x.mp4"));
    assert!(artifacts.video_path.is_none());
}

#[tokio::test]
async fn test_without_pid_writes_null() {
    let env = TestEnv::new().await;
    let job = job_in_status(&env.pool, EXIT_CLEAN, JobStatus::Rendering).await;

    let set = JobUpdate {
        pid: Some(4242),
        ..JobUpdate::default()
    };
    queries::conditional_update(&env.pool, job.id, &[], &set).await.unwrap();
    assert_eq!(fetch(&env.pool, job.id).await.pid, Some(4242));

    let clear = JobUpdate {
        pid: Some(1),
        ..JobUpdate::default()
    }
    .without_pid();
    queries::conditional_update(&env.pool, job.id, &[], &clear).await.unwrap();
    assert_eq!(fetch(&env.pool, job.id).await.pid, None);
}
