//! Job lifecycle: enqueue, completion, retry with backoff, dead-lettering.

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobState, NewJob, QueueConfig, QueueStatus};

use crate::{JobPatch, JobStore, Result};

/// Retry and dead-letter policy expressed over a [`JobStore`].
///
/// Holds no job state of its own; every decision re-reads the store.
#[derive(Clone)]
pub struct JobQueue {
    store: JobStore,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(store: JobStore, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate a submission and persist it as a fresh pending job.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<Job> {
        let job = new_job.into_job(self.config.max_retries)?;
        let job = self.store.create_job(&job).await?;
        tracing::info!(job_id = %job.id, max_retries = job.max_retries, "job enqueued");
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>> {
        self.store.list_jobs(state, limit).await
    }

    /// Jobs in the dead-letter queue, newest first.
    pub async fn list_dead(&self, limit: usize) -> Result<Vec<Job>> {
        self.store.list_jobs(Some(JobState::Dead), limit).await
    }

    /// Record a successful run. Clears any previous error and the lock.
    pub async fn mark_completed(&self, id: &JobId, output: Option<String>) -> Result<bool> {
        let patch = JobPatch::new()
            .state(JobState::Completed)
            .output(output)
            .error(None)
            .next_retry_at(None)
            .clear_lock();
        let updated = self.store.update_job(id, &patch).await?;
        if updated {
            tracing::info!(job_id = %id, "job completed");
        }
        Ok(updated)
    }

    /// Record a failed run.
    ///
    /// Once the failure count reaches `max_retries` the job is dead; otherwise
    /// it is failed and eligible again after `backoff_base ^ attempts` seconds.
    /// Returns `false` if the job does not exist.
    pub async fn mark_failed(&self, id: &JobId, error: Option<String>) -> Result<bool> {
        let Some(job) = self.store.get_job(id).await? else {
            return Ok(false);
        };

        let attempts = job.attempts.saturating_add(1);
        let patch = JobPatch::new()
            .attempts(attempts)
            .error(error)
            .clear_lock();

        let patch = if attempts >= job.max_retries {
            tracing::warn!(job_id = %id, attempts, "job moved to dead-letter queue");
            patch.state(JobState::Dead).next_retry_at(None)
        } else {
            let retry_at = self.retry_at(Utc::now(), attempts);
            tracing::info!(
                job_id = %id,
                attempts,
                max_retries = job.max_retries,
                %retry_at,
                "job failed, retry scheduled"
            );
            patch.state(JobState::Failed).next_retry_at(Some(retry_at))
        };

        self.store.update_job(id, &patch).await
    }

    fn retry_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        now.checked_add_signed(self.config.backoff_delay(attempts))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Move a dead job back to pending with a clean slate.
    ///
    /// Returns `false` if the job is absent or not dead.
    pub async fn retry_dlq_job(&self, id: &JobId) -> Result<bool> {
        match self.store.get_job(id).await? {
            Some(job) if job.state == JobState::Dead => {}
            _ => return Ok(false),
        }

        let patch = JobPatch::new()
            .state(JobState::Pending)
            .attempts(0)
            .error(None)
            .next_retry_at(None)
            .clear_lock();
        let updated = self.store.update_job(id, &patch).await?;
        if updated {
            tracing::info!(job_id = %id, "dead job requeued");
        }
        Ok(updated)
    }

    /// Next candidate for execution; see [`JobStore::get_next_pending_job`].
    pub async fn get_next_job(&self) -> Result<Option<Job>> {
        self.store.get_next_pending_job().await
    }

    pub async fn acquire_job(&self, id: &JobId, worker_id: &str) -> Result<bool> {
        self.store.acquire_job_lock(id, worker_id).await
    }

    pub async fn release_job(&self, id: &JobId) -> Result<bool> {
        self.store.release_job_lock(id).await
    }

    /// Reset jobs whose lock outlived the configured `lock_timeout`.
    pub async fn recover_stale_locks(&self) -> Result<usize> {
        self.store.cleanup_stale_locks(self.config.lock_timeout()).await
    }

    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        self.store.delete_job(id).await
    }

    pub async fn get_status(&self) -> Result<QueueStatus> {
        let counts = self.store.get_job_counts().await?;
        Ok(QueueStatus::from_counts(&counts))
    }
}
