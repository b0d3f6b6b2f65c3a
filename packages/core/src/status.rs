//! Aggregate job counts for status reporting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::JobState;

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl QueueStatus {
    /// Build from per-state counts; states absent from the map count as zero.
    pub fn from_counts(counts: &HashMap<JobState, u64>) -> Self {
        let get = |state| counts.get(&state).copied().unwrap_or(0);
        Self {
            total: counts.values().sum(),
            pending: get(JobState::Pending),
            processing: get(JobState::Processing),
            completed: get(JobState::Completed),
            failed: get(JobState::Failed),
            dead: get(JobState::Dead),
        }
    }

    pub fn count(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }
}
