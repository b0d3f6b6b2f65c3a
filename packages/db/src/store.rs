//! Durable job table and the atomic lock primitives built on it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use queue_core::{Job, JobId, JobState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Thing;

use crate::{Database, QueueError, Result};

/// Persisted shape of a job.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    job_id: String,
    command: String,
    state: String,
    attempts: u32,
    max_retries: u32,
    created_at: i64,
    updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locked_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_retry_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: None,
            job_id: job.id.to_string(),
            command: job.command.clone(),
            state: job.state.as_str().to_string(),
            attempts: job.attempts,
            max_retries: job.max_retries,
            created_at: micros(job.created_at),
            updated_at: micros(job.updated_at),
            locked_by: job.locked_by.clone(),
            locked_at: job.locked_at.map(micros),
            next_retry_at: job.next_retry_at.map(micros),
            error: job.error.clone(),
            output: job.output.clone(),
        }
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = QueueError;

    fn try_from(record: JobRecord) -> Result<Self> {
        let state = record
            .state
            .parse::<JobState>()
            .map_err(|e| QueueError::Corrupt(format!("job {}: {e}", record.job_id)))?;
        Ok(Job {
            state,
            attempts: record.attempts,
            max_retries: record.max_retries,
            created_at: timestamp(record.created_at)?,
            updated_at: timestamp(record.updated_at)?,
            locked_by: record.locked_by,
            locked_at: record.locked_at.map(timestamp).transpose()?,
            next_retry_at: record.next_retry_at.map(timestamp).transpose()?,
            error: record.error,
            output: record.output,
            command: record.command,
            id: JobId::new(record.job_id),
        })
    }
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn timestamp(us: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| QueueError::Corrupt(format!("timestamp out of range: {us}")))
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>> {
    records.into_iter().map(Job::try_from).collect()
}

/// A partial update of a job.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub attempts: Option<u32>,
    pub locked_by: Option<Option<String>>,
    pub locked_at: Option<Option<DateTime<Utc>>>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub error: Option<Option<String>>,
    pub output: Option<Option<String>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn output(mut self, output: Option<String>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn next_retry_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_retry_at = Some(at);
        self
    }

    pub fn lock(mut self, worker_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.locked_by = Some(Some(worker_id.into()));
        self.locked_at = Some(Some(at));
        self
    }

    pub fn clear_lock(mut self) -> Self {
        self.locked_by = Some(None);
        self.locked_at = Some(None);
        self
    }

    /// SET assignments and their bindings. Cleared fields become NONE.
    fn assignments(&self) -> (Vec<String>, Vec<(&'static str, Value)>) {
        let mut sets = Vec::new();
        let mut bindings = Vec::new();

        let mut assign = |field: &'static str, value: Option<Option<Value>>| match value {
            None => {}
            Some(None) => sets.push(format!("{field} = NONE")),
            Some(Some(value)) => {
                sets.push(format!("{field} = ${field}"));
                bindings.push((field, value));
            }
        };

        assign("state", self.state.map(|s| Some(Value::from(s.as_str()))));
        assign("attempts", self.attempts.map(|n| Some(Value::from(n))));
        assign(
            "locked_by",
            self.locked_by.clone().map(|w| w.map(Value::from)),
        );
        assign(
            "locked_at",
            self.locked_at.map(|at| at.map(|t| Value::from(micros(t)))),
        );
        assign(
            "next_retry_at",
            self.next_retry_at.map(|at| at.map(|t| Value::from(micros(t)))),
        );
        assign("error", self.error.clone().map(|e| e.map(Value::from)));
        assign("output", self.output.clone().map(|o| o.map(Value::from)));

        (sets, bindings)
    }
}

const NEXT_PENDING: &str = r#"
SELECT * FROM job
WHERE locked_by = NONE
    AND (state = "pending" OR (state = "failed" AND (next_retry_at = NONE OR next_retry_at <= $now)))
ORDER BY created_at ASC, job_id ASC
LIMIT 1
"#;

const ACQUIRE_LOCK: &str = r#"
UPDATE type::thing("job", $id)
SET locked_by = $worker_id, locked_at = $now, state = "processing", next_retry_at = NONE,
    updated_at = $now
WHERE locked_by = NONE AND state IN ["pending", "failed"]
RETURN AFTER
"#;

// updated_at and state are assigned before the lock fields are cleared so
// both conditions see the row as it was.
const RELEASE_LOCK: &str = r#"
UPDATE type::thing("job", $id)
SET updated_at = IF locked_by = NONE AND state != "processing" THEN updated_at ELSE $now END,
    state = IF state = "processing" THEN "pending" ELSE state END,
    next_retry_at = IF state = "failed" THEN next_retry_at ELSE NONE END,
    locked_by = NONE,
    locked_at = NONE
RETURN AFTER
"#;

const CLEANUP_STALE: &str = r#"
UPDATE job
SET state = "pending", locked_by = NONE, locked_at = NONE, next_retry_at = NONE,
    updated_at = $now
WHERE locked_by != NONE AND locked_at != NONE AND locked_at < $cutoff
RETURN AFTER
"#;

const COUNT_BY_STATE: &str = r#"
SELECT state, count() AS count FROM job GROUP BY state
"#;

/// Durable keyed table of jobs.
///
/// Every method is a single statement, and therefore a single transaction,
/// against the store. No connection or transaction is held between calls.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new job as given. Fails with `DuplicateId` if the id is taken.
    pub async fn create_job(&self, job: &Job) -> Result<Job> {
        if self.get_job(&job.id).await?.is_some() {
            return Err(QueueError::DuplicateId(job.id.clone()));
        }

        let mut record = JobRecord::from(job);
        record.updated_at = micros(Utc::now());

        let created: Option<JobRecord> =
            match self.db.create(("job", job.id.to_string())).content(record).await {
                Ok(created) => created,
                Err(e) => {
                    // A concurrent insert of the same id may have won.
                    if self.get_job(&job.id).await?.is_some() {
                        return Err(QueueError::DuplicateId(job.id.clone()));
                    }
                    return Err(e.into());
                }
            };

        let created = created
            .ok_or_else(|| QueueError::Corrupt(format!("job {} was not created", job.id)))?;
        tracing::debug!(job_id = %job.id, "job created");
        Job::try_from(created)
    }

    /// Point lookup.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        record.map(Job::try_from).transpose()
    }

    /// Apply a partial update and refresh `updated_at`. Returns whether the job exists.
    pub async fn update_job(&self, id: &JobId, patch: &JobPatch) -> Result<bool> {
        let (mut sets, bindings) = patch.assignments();
        sets.push("updated_at = $updated_at".to_string());

        let query = format!(
            "UPDATE type::thing(\"job\", $id) SET {} RETURN AFTER",
            sets.join(", ")
        );

        let mut request = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("updated_at", micros(Utc::now())));
        for (name, value) in bindings {
            request = request.bind((name, value));
        }

        let mut response = request.await?;
        let updated: Vec<JobRecord> = response.take(0)?;
        Ok(!updated.is_empty())
    }

    /// Jobs newest first, optionally restricted to one state.
    pub async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>> {
        let where_clause = if state.is_some() {
            "WHERE state = $state"
        } else {
            ""
        };
        let query = format!(
            "SELECT * FROM job {where_clause} ORDER BY created_at DESC, job_id DESC LIMIT $limit"
        );

        let mut request = self
            .db
            .query(query)
            .bind(("limit", i64::try_from(limit).unwrap_or(i64::MAX)));
        if let Some(state) = state {
            request = request.bind(("state", state.as_str()));
        }

        let mut response = request.await?;
        let records: Vec<JobRecord> = response.take(0)?;
        into_jobs(records)
    }

    /// Number of jobs per state. States with no jobs are absent.
    pub async fn get_job_counts(&self) -> Result<HashMap<JobState, u64>> {
        #[derive(Deserialize)]
        struct StateCount {
            state: String,
            count: u64,
        }

        let mut response = self.db.query(COUNT_BY_STATE).await?;
        let counts: Vec<StateCount> = response.take(0)?;

        counts
            .into_iter()
            .map(|row| {
                let state = row
                    .state
                    .parse::<JobState>()
                    .map_err(|e| QueueError::Corrupt(e.to_string()))?;
                Ok((state, row.count))
            })
            .collect()
    }

    /// Oldest unlocked job that is pending, or failed with an elapsed backoff.
    ///
    /// This is a hint, not a reservation: another worker may take the job
    /// before `acquire_job_lock` is called.
    pub async fn get_next_pending_job(&self) -> Result<Option<Job>> {
        let mut response = self
            .db
            .query(NEXT_PENDING)
            .bind(("now", micros(Utc::now())))
            .await?;
        let record: Option<JobRecord> = response.take(0)?;
        record.map(Job::try_from).transpose()
    }

    /// Lock a pending or failed job for `worker_id` and move it to processing.
    ///
    /// A single conditional update; when several workers race for the same
    /// job exactly one gets `true`.
    pub async fn acquire_job_lock(&self, id: &JobId, worker_id: &str) -> Result<bool> {
        let result = self
            .db
            .query(ACQUIRE_LOCK)
            .bind(("id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("now", micros(Utc::now())))
            .await
            .and_then(|mut response| response.take::<Vec<JobRecord>>(0));

        match result {
            Ok(locked) => Ok(!locked.is_empty()),
            Err(e) => self.settle_conflict(id, worker_id, e).await,
        }
    }

    /// Decide the outcome of an acquire whose statement errored, typically a
    /// write conflict with a concurrent acquire.
    async fn settle_conflict(
        &self,
        id: &JobId,
        worker_id: &str,
        error: surrealdb::Error,
    ) -> Result<bool> {
        match self.get_job(id).await? {
            Some(job) if job.locked_by.as_deref() == Some(worker_id) => Ok(true),
            Some(job) if job.is_locked() || !job.state.is_acquirable() => {
                tracing::debug!(job_id = %id, %worker_id, %error, "lost lock race");
                Ok(false)
            }
            _ => Err(error.into()),
        }
    }

    /// Clear the lock. A job still in processing goes back to pending.
    ///
    /// Idempotent; returns whether the job exists.
    pub async fn release_job_lock(&self, id: &JobId) -> Result<bool> {
        let mut response = self
            .db
            .query(RELEASE_LOCK)
            .bind(("id", id.to_string()))
            .bind(("now", micros(Utc::now())))
            .await?;
        let released: Vec<JobRecord> = response.take(0)?;
        Ok(!released.is_empty())
    }

    /// Return jobs whose lock is older than `timeout` to pending.
    ///
    /// Recovers jobs held by a worker process that died. Returns how many
    /// jobs were reset.
    pub async fn cleanup_stale_locks(&self, timeout: Duration) -> Result<usize> {
        let now = Utc::now();
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut response = self
            .db
            .query(CLEANUP_STALE)
            .bind(("now", micros(now)))
            .bind(("cutoff", micros(cutoff)))
            .await?;
        let reset: Vec<JobRecord> = response.take(0)?;

        for record in &reset {
            tracing::warn!(job_id = %record.job_id, "reset job with stale lock");
        }
        Ok(reset.len())
    }

    /// Remove a job. Returns whether it existed.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let deleted: Option<JobRecord> = self.db.delete(("job", id.to_string())).await?;
        Ok(deleted.is_some())
    }
}
