//! The worker loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use db::JobQueue;
use futures_util::FutureExt;
use queue_core::{Job, JobId, JobState};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::error::WorkerError;
use crate::executor::{CommandRunner, ShellRunner};

/// Outcome of a single [`Worker::run_once`] cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// No eligible job was found.
    Idle,
    /// Another worker locked the candidate first.
    Contended(JobId),
    Completed(JobId),
    /// The command failed and the job is scheduled for another attempt.
    Retrying(JobId),
    /// The command failed and the job exhausted its retries.
    Dead(JobId),
}

/// Generate a fresh worker identifier.
pub fn generate_worker_id() -> String {
    format!("worker-{}", Ulid::new())
}

/// Executes jobs one at a time.
///
/// Holds no job state between cycles. The only coordination with other
/// workers is the store's conditional lock update.
pub struct Worker {
    id: String,
    queue: JobQueue,
    runner: Arc<dyn CommandRunner>,
}

impl Worker {
    /// Create a worker that runs commands through the platform shell.
    pub fn new(id: impl Into<String>, queue: JobQueue) -> Self {
        Self {
            id: id.into(),
            queue,
            runner: Arc::new(ShellRunner),
        }
    }

    /// Replace the command runner.
    pub fn with_runner(mut self, runner: impl CommandRunner) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between cycles and while idle; a job already
    /// in hand always runs to completion first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let poll_interval = self.queue.config().poll_interval();
        tracing::info!(worker_id = %self.id, ?poll_interval, "worker started");

        while !shutdown.is_cancelled() {
            if self.run_once().await? != Poll::Idle {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::info!(worker_id = %self.id, "worker stopped");
        Ok(())
    }

    /// Poll for one job, execute it if the lock is won, then release it.
    ///
    /// The lock is released on every path once acquired, including when
    /// recording the outcome fails or the runner panics.
    pub async fn run_once(&self) -> Result<Poll, WorkerError> {
        let Some(job) = self.queue.get_next_job().await? else {
            return Ok(Poll::Idle);
        };

        if !self.queue.acquire_job(&job.id, &self.id).await? {
            tracing::debug!(job_id = %job.id, worker_id = %self.id, "lost lock race");
            return Ok(Poll::Contended(job.id));
        }

        let outcome = AssertUnwindSafe(self.process(&job)).catch_unwind().await;
        let released = self.queue.release_job(&job.id).await;

        match outcome {
            Ok(Ok(poll)) => {
                released?;
                Ok(poll)
            }
            Ok(Err(error)) => {
                self.log_release_failure(&job.id, released);
                Err(error)
            }
            Err(panic) => {
                self.log_release_failure(&job.id, released);
                let message = panic_message(panic.as_ref());
                tracing::error!(job_id = %job.id, worker_id = %self.id, %message, "worker panicked");
                Err(WorkerError::Panicked {
                    job_id: job.id,
                    message,
                })
            }
        }
    }

    async fn process(&self, job: &Job) -> Result<Poll, WorkerError> {
        tracing::info!(
            job_id = %job.id,
            worker_id = %self.id,
            command = %job.command,
            attempts = job.attempts,
            "processing job"
        );

        let output = self.runner.run(&job.command).await;

        if output.success() {
            self.queue.mark_completed(&job.id, output.output()).await?;
            return Ok(Poll::Completed(job.id.clone()));
        }

        let error = output.error_message();
        tracing::info!(job_id = %job.id, exit_code = output.exit_code, %error, "command failed");
        self.queue.mark_failed(&job.id, Some(error)).await?;

        let state = self.queue.get_job(&job.id).await?.map(|job| job.state);
        Ok(match state {
            Some(JobState::Dead) => Poll::Dead(job.id.clone()),
            _ => Poll::Retrying(job.id.clone()),
        })
    }

    fn log_release_failure(&self, job_id: &JobId, released: db::Result<bool>) {
        if let Err(error) = released {
            tracing::warn!(%job_id, worker_id = %self.id, %error, "failed to release job lock");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
