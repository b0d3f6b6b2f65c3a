#![allow(dead_code)]

use std::time::Duration;

use db::{Database, DbConfig, JobQueue, JobStore, QueueError};
use queue_core::QueueConfig;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A queue over a fresh in-memory store that retries immediately.
pub async fn queue() -> Result<JobQueue, QueueError> {
    let config = QueueConfig::default()
        .with_backoff_base(0.0)
        .with_poll_interval(Duration::from_millis(20));
    queue_with(config).await
}

pub async fn queue_with(config: QueueConfig) -> Result<JobQueue, QueueError> {
    let store = db::open(&DbConfig::memory()).await?;
    Ok(JobQueue::new(store, config))
}

/// Like [`queue`], also handing back the raw connection behind it.
pub async fn queue_and_database() -> Result<(JobQueue, Database), QueueError> {
    let db = db::connect(&DbConfig::memory()).await?;
    db::init_schema(&db).await?;
    let config = QueueConfig::default().with_backoff_base(0.0);
    Ok((JobQueue::new(JobStore::new(db.clone()), config), db))
}
