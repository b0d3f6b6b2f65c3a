use queue_core::{JobId, ValidationError};
use thiserror::Error;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

/// Errors surfaced by the store and the lifecycle layer.
///
/// A failed execution of a job's command is not an error; it is recorded on
/// the job through `JobQueue::mark_failed`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid job: {0}")]
    Validation(#[from] ValidationError),
    #[error("job already exists: {0}")]
    DuplicateId(JobId),
    #[error("store error: {0}")]
    Store(#[from] surrealdb::Error),
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}
