//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and NewJob for work items
//! - QueueConfig for retry and polling policy
//! - QueueStatus for aggregate reporting

mod config;
mod job;
mod status;

pub use config::QueueConfig;
pub use job::{Job, JobId, JobState, NewJob, ParseStateError, ValidationError};
pub use status::QueueStatus;
