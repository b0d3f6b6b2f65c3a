//! Job domain types for work items in the queue.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a job, assigned by whoever submits it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current state of a job in its lifecycle.
///
/// ```text
/// pending    --acquire-->  processing
/// failed     --acquire-->  processing   (once next_retry_at has elapsed)
/// processing --success-->  completed
/// processing --failure-->  failed | dead
/// dead       --requeue-->  pending
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be picked up by a worker.
    #[default]
    Pending,
    /// Locked by a worker and currently executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed, waiting for its backoff to elapse before the next attempt.
    Failed,
    /// Exhausted its retries; sits in the dead-letter queue.
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    /// States from which a worker may take the job.
    pub fn is_acquirable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for JobState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// A job as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Shell command to execute; opaque to the queue itself.
    pub command: String,
    pub state: JobState,
    /// Number of failed execution attempts so far.
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Worker currently holding the lock, only set while processing.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Earliest time a failed job may be picked up again.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last failure detail.
    pub error: Option<String>,
    /// Captured output of the last successful run.
    pub output: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: impl Into<JobId>, command: impl Into<String>, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            locked_by: None,
            locked_at: None,
            next_retry_at: None,
            error: None,
            output: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

/// Reasons a submitted job is rejected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("job must contain an 'id' field")]
    MissingId,
    #[error("job must contain a 'command' field")]
    MissingCommand,
    #[error("job id must not be empty")]
    EmptyId,
    #[error("job command must not be empty")]
    EmptyCommand,
    #[error("malformed job: {0}")]
    Malformed(String),
}

/// A job submission as provided by a caller.
///
/// Fields are optional so that missing ones can be reported instead of defaulted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            command: Some(command.into()),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Parse a submission from its JSON form, e.g. `{"id":"job1","command":"echo hi"}`.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.id.as_deref() {
            None => return Err(ValidationError::MissingId),
            Some(id) if id.trim().is_empty() => return Err(ValidationError::EmptyId),
            Some(_) => {}
        }
        match self.command.as_deref() {
            None => Err(ValidationError::MissingCommand),
            Some(command) if command.trim().is_empty() => Err(ValidationError::EmptyCommand),
            Some(_) => Ok(()),
        }
    }

    /// Build the pending job to persist, filling `max_retries` from `default_max_retries`.
    pub fn into_job(self, default_max_retries: u32) -> Result<Job, ValidationError> {
        self.validate()?;
        let (Some(id), Some(command)) = (self.id, self.command) else {
            return Err(ValidationError::MissingId);
        };
        Ok(Job::new(
            id,
            command,
            self.max_retries.unwrap_or(default_max_retries),
        ))
    }
}
