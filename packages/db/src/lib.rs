//! SurrealDB-backed persistence and lifecycle policy for the job queue.
//!
//! [`JobStore`] owns the persisted representation of jobs and provides the
//! one concurrency primitive the system relies on: a single conditional
//! update that locks a job for exactly one worker. [`JobQueue`] layers the
//! retry, backoff and dead-letter policy on top of it.
//!
//! # Features
//!
//! - `memory` (default): In-memory storage for testing
//! - `rocksdb`: RocksDB for single-process file-based storage
//! - `surrealkv`: SurrealKV for single-process file-based storage
//!
//! Multi-process deployments point every process at the same SurrealDB
//! server through a `ws://` endpoint.

mod connection;
mod error;
mod queue;
mod schema;
mod store;

pub use connection::{Database, DbConfig, connect};
pub use error::{QueueError, Result};
pub use queue::JobQueue;
pub use schema::init_schema;
pub use store::{JobPatch, JobStore};

/// Connect to the configured endpoint and make sure the schema exists.
pub async fn open(config: &DbConfig) -> Result<JobStore> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(JobStore::new(db))
}
