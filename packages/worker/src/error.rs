use db::QueueError;
use queue_core::JobId;
use thiserror::Error;

/// Errors that stop a worker loop.
///
/// A command exiting non-zero is not one of them; that outcome is recorded on
/// the job and the loop carries on.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("worker panicked while running job {job_id}: {message}")]
    Panicked { job_id: JobId, message: String },
}

/// Registry and supervisor errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(unix)]
    #[error("signal error: {0}")]
    Signal(#[from] nix::errno::Errno),
}
