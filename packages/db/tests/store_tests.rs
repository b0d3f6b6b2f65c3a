#![allow(clippy::disallowed_methods)]

mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::TestResult;
use db::{JobPatch, QueueError};
use queue_core::{Job, JobId, JobState};
use tokio::task::JoinSet;

fn job_created_at(id: &str, offset_secs: i64) -> Job {
    let mut job = Job::new(id, "true", 3);
    job.created_at = Utc::now() - TimeDelta::minutes(10) + TimeDelta::seconds(offset_secs);
    job
}

#[tokio::test]
async fn create_get_and_reject_duplicates() -> TestResult {
    let store = common::store().await?;

    let created = store.create_job(&Job::new("j1", "echo hi", 3)).await?;
    assert_eq!(created.id.as_str(), "j1");
    assert_eq!(created.state, JobState::Pending);
    assert_eq!(created.attempts, 0);
    assert!(created.locked_by.is_none());
    assert!(created.error.is_none());
    assert!(created.output.is_none());

    let loaded = store.get_job(&JobId::from("j1")).await?.expect("job j1");
    assert_eq!(loaded.command, "echo hi");
    assert_eq!(loaded.max_retries, 3);

    let duplicate = store.create_job(&Job::new("j1", "echo other", 1)).await;
    assert!(matches!(duplicate, Err(QueueError::DuplicateId(id)) if id.as_str() == "j1"));

    let unchanged = store.get_job(&JobId::from("j1")).await?.expect("job j1");
    assert_eq!(unchanged.command, "echo hi");

    assert!(store.get_job(&JobId::from("missing")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn update_applies_partial_fields() -> TestResult {
    let store = common::store().await?;
    let job = store.create_job(&Job::new("j1", "false", 3)).await?;

    let retry_at = Utc::now() + TimeDelta::seconds(30);
    let patch = JobPatch::new()
        .state(JobState::Failed)
        .attempts(1)
        .error(Some("boom".into()))
        .next_retry_at(Some(retry_at));
    assert!(store.update_job(&job.id, &patch).await?);

    let updated = store.get_job(&job.id).await?.expect("job");
    assert_eq!(updated.state, JobState::Failed);
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.error.as_deref(), Some("boom"));
    assert_eq!(
        updated.next_retry_at.map(|t| t.timestamp_micros()),
        Some(retry_at.timestamp_micros())
    );
    assert_eq!(updated.command, "false");
    assert!(updated.updated_at >= job.updated_at);

    let clear = JobPatch::new().error(None).next_retry_at(None);
    assert!(store.update_job(&job.id, &clear).await?);
    let cleared = store.get_job(&job.id).await?.expect("job");
    assert!(cleared.error.is_none());
    assert!(cleared.next_retry_at.is_none());
    assert_eq!(cleared.attempts, 1);

    assert!(!store.update_job(&JobId::from("missing"), &patch).await?);
    assert!(store.get_job(&JobId::from("missing")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn list_is_newest_first_and_filters_by_state() -> TestResult {
    let store = common::store().await?;
    store.create_job(&job_created_at("old", 0)).await?;
    store.create_job(&job_created_at("mid", 1)).await?;
    let mut dead = job_created_at("new", 2);
    dead.state = JobState::Dead;
    store.create_job(&dead).await?;

    let all = store.list_jobs(None, 10).await?;
    let ids: Vec<_> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);

    let limited = store.list_jobs(None, 2).await?;
    assert_eq!(limited.len(), 2);

    let dead = store.list_jobs(Some(JobState::Dead), 10).await?;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id.as_str(), "new");

    let counts = store.get_job_counts().await?;
    assert_eq!(counts.get(&JobState::Pending), Some(&2));
    assert_eq!(counts.get(&JobState::Dead), Some(&1));
    assert_eq!(counts.get(&JobState::Completed), None);
    Ok(())
}

#[tokio::test]
async fn next_pending_prefers_oldest_eligible_job() -> TestResult {
    let store = common::store().await?;
    assert!(store.get_next_pending_job().await?.is_none());

    let mut waiting = job_created_at("waiting", 0);
    waiting.state = JobState::Failed;
    waiting.next_retry_at = Some(Utc::now() + TimeDelta::minutes(5));
    store.create_job(&waiting).await?;

    let mut done = job_created_at("done", 1);
    done.state = JobState::Completed;
    store.create_job(&done).await?;

    store.create_job(&job_created_at("second", 3)).await?;
    store.create_job(&job_created_at("first", 2)).await?;

    let next = store.get_next_pending_job().await?.expect("eligible job");
    assert_eq!(next.id.as_str(), "first");

    // Selection is only a hint: nothing was reserved.
    let again = store.get_next_pending_job().await?.expect("eligible job");
    assert_eq!(again.id.as_str(), "first");

    assert!(store.acquire_job_lock(&next.id, "worker-1").await?);
    let next = store.get_next_pending_job().await?.expect("eligible job");
    assert_eq!(next.id.as_str(), "second");

    let mut ready = job_created_at("ready", -1);
    ready.state = JobState::Failed;
    ready.next_retry_at = Some(Utc::now() - TimeDelta::seconds(1));
    store.create_job(&ready).await?;
    let next = store.get_next_pending_job().await?.expect("eligible job");
    assert_eq!(next.id.as_str(), "ready");
    Ok(())
}

#[tokio::test]
async fn acquire_locks_only_pending_or_failed_jobs() -> TestResult {
    let store = common::store().await?;
    let job = store.create_job(&Job::new("j1", "true", 3)).await?;

    assert!(store.acquire_job_lock(&job.id, "worker-1").await?);
    let locked = store.get_job(&job.id).await?.expect("job");
    assert_eq!(locked.state, JobState::Processing);
    assert_eq!(locked.locked_by.as_deref(), Some("worker-1"));
    assert!(locked.locked_at.is_some());

    assert!(!store.acquire_job_lock(&job.id, "worker-2").await?);
    assert!(!store.acquire_job_lock(&job.id, "worker-1").await?);

    let mut done = Job::new("done", "true", 3);
    done.state = JobState::Completed;
    store.create_job(&done).await?;
    assert!(!store.acquire_job_lock(&done.id, "worker-1").await?);

    assert!(!store.acquire_job_lock(&JobId::from("missing"), "worker-1").await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_acquire_wins() -> TestResult {
    let store = common::store().await?;
    let job = store.create_job(&Job::new("contended", "true", 3)).await?;

    let mut attempts = JoinSet::new();
    for i in 0..16 {
        let store = store.clone();
        let id = job.id.clone();
        attempts.spawn(async move { store.acquire_job_lock(&id, &format!("worker-{i}")).await });
    }

    let mut winners = 0;
    while let Some(result) = attempts.join_next().await {
        if result?? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let locked = store.get_job(&job.id).await?.expect("job");
    assert_eq!(locked.state, JobState::Processing);
    assert!(locked.locked_by.is_some());
    Ok(())
}

#[tokio::test]
async fn release_is_idempotent_on_unlocked_jobs() -> TestResult {
    let store = common::store().await?;
    let mut job = Job::new("j1", "false", 3);
    job.state = JobState::Failed;
    job.attempts = 1;
    job.error = Some("boom".into());
    let job = store.create_job(&job).await?;

    assert!(store.release_job_lock(&job.id).await?);
    assert!(store.release_job_lock(&job.id).await?);

    let after = store.get_job(&job.id).await?.expect("job");
    assert_eq!(after.state, JobState::Failed);
    assert_eq!(after.attempts, 1);
    assert_eq!(after.error.as_deref(), Some("boom"));
    assert!(after.locked_by.is_none());

    assert!(!store.release_job_lock(&JobId::from("missing")).await?);
    Ok(())
}

#[tokio::test]
async fn releasing_a_processing_job_returns_it_to_pending() -> TestResult {
    let store = common::store().await?;
    let job = store.create_job(&Job::new("j1", "true", 3)).await?;
    assert!(store.acquire_job_lock(&job.id, "worker-1").await?);

    assert!(store.release_job_lock(&job.id).await?);
    let released = store.get_job(&job.id).await?.expect("job");
    assert_eq!(released.state, JobState::Pending);
    assert!(released.locked_by.is_none());
    assert!(released.locked_at.is_none());

    assert!(store.acquire_job_lock(&job.id, "worker-2").await?);
    Ok(())
}

#[tokio::test]
async fn stale_locks_are_reset_to_pending() -> TestResult {
    let store = common::store().await?;
    let stale = store.create_job(&Job::new("stale", "sleep 1000", 3)).await?;
    let fresh = store.create_job(&Job::new("fresh", "sleep 1000", 3)).await?;
    store.create_job(&Job::new("idle", "true", 3)).await?;

    assert!(store.acquire_job_lock(&stale.id, "dead-worker").await?);
    assert!(store.acquire_job_lock(&fresh.id, "live-worker").await?);
    let backdate = JobPatch::new().lock("dead-worker", Utc::now() - TimeDelta::minutes(10));
    assert!(store.update_job(&stale.id, &backdate).await?);

    let reset = store.cleanup_stale_locks(Duration::from_secs(60)).await?;
    assert_eq!(reset, 1);

    let stale = store.get_job(&stale.id).await?.expect("job");
    assert_eq!(stale.state, JobState::Pending);
    assert!(stale.locked_by.is_none());
    assert!(stale.locked_at.is_none());

    let fresh = store.get_job(&fresh.id).await?.expect("job");
    assert_eq!(fresh.state, JobState::Processing);
    assert_eq!(fresh.locked_by.as_deref(), Some("live-worker"));

    assert_eq!(store.cleanup_stale_locks(Duration::from_secs(60)).await?, 0);
    Ok(())
}

#[tokio::test]
async fn retry_time_is_kept_only_while_failed() -> TestResult {
    let store = common::store().await?;
    let mut job = Job::new("j1", "false", 3);
    job.state = JobState::Failed;
    job.attempts = 1;
    job.next_retry_at = Some(Utc::now() - TimeDelta::seconds(1));
    let job = store.create_job(&job).await?;

    // Releasing an unlocked failed job keeps its schedule.
    assert!(store.release_job_lock(&job.id).await?);
    let failed = store.get_job(&job.id).await?.expect("job");
    assert!(failed.next_retry_at.is_some());

    assert!(store.acquire_job_lock(&job.id, "worker-1").await?);
    let locked = store.get_job(&job.id).await?.expect("job");
    assert_eq!(locked.state, JobState::Processing);
    assert!(locked.next_retry_at.is_none());

    let stray_retry = JobPatch::new().next_retry_at(Some(Utc::now()));
    assert!(store.update_job(&job.id, &stray_retry).await?);
    assert!(store.release_job_lock(&job.id).await?);
    let released = store.get_job(&job.id).await?.expect("job");
    assert_eq!(released.state, JobState::Pending);
    assert!(released.next_retry_at.is_none());

    assert!(store.acquire_job_lock(&job.id, "worker-2").await?);
    let stale = JobPatch::new()
        .lock("worker-2", Utc::now() - TimeDelta::minutes(10))
        .next_retry_at(Some(Utc::now()));
    assert!(store.update_job(&job.id, &stale).await?);
    assert_eq!(store.cleanup_stale_locks(Duration::from_secs(60)).await?, 1);
    let recovered = store.get_job(&job.id).await?.expect("job");
    assert_eq!(recovered.state, JobState::Pending);
    assert!(recovered.next_retry_at.is_none());
    Ok(())
}

#[tokio::test]
async fn delete_removes_the_row() -> TestResult {
    let store = common::store().await?;
    let job = store.create_job(&Job::new("j1", "true", 3)).await?;

    assert!(store.delete_job(&job.id).await?);
    assert!(store.get_job(&job.id).await?.is_none());
    assert!(!store.delete_job(&job.id).await?);
    Ok(())
}
