#![allow(dead_code)]

use db::{DbConfig, JobQueue, JobStore, QueueError};
use queue_core::QueueConfig;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A fresh, isolated in-memory store.
pub async fn store() -> Result<JobStore, QueueError> {
    db::open(&DbConfig::memory()).await
}

pub async fn queue(config: QueueConfig) -> Result<JobQueue, QueueError> {
    Ok(JobQueue::new(store().await?, config))
}
