//! Worker processes for the job queue.
//!
//! # Architecture
//!
//! - `Worker` - Single-threaded poll, acquire, execute, release loop
//! - `CommandRunner` - Executes a job's shell command and captures its output
//! - `Supervisor` - Spawns, lists and stops detached worker processes
//! - `WorkerRegistry` - JSON file recording the workers a supervisor started
//!
//! # Usage
//!
//! ```ignore
//! use worker::{Worker, generate_worker_id};
//!
//! let worker = Worker::new(generate_worker_id(), queue);
//! worker.run(shutdown_token).await?;
//! ```

mod error;
mod executor;
mod registry;
mod supervisor;
mod worker;

pub use error::{RegistryError, WorkerError};
pub use executor::{CommandOutput, CommandRunner, FnRunner, RunFuture, ShellRunner};
pub use registry::{WorkerEntry, WorkerRegistry};
pub use supervisor::Supervisor;
pub use worker::{Poll, Worker, generate_worker_id};

/// Re-export the shutdown token type used by [`Worker::run`].
pub use tokio_util::sync::CancellationToken;
