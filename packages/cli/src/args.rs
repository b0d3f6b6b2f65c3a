use std::path::PathBuf;

use clap::{Parser, Subcommand};
use queue_core::JobState;

/// Background job queue with worker processes, retries and a dead-letter queue.
#[derive(Parser, Debug)]
#[command(name = "queuectl", about, long_about = None, version)]
pub(crate) struct Args {
    /// Directory holding config.json and the worker registry [default: ~/.queuectl].
    #[arg(long, global = true, env = "QUEUECTL_HOME")]
    pub(crate) config_dir: Option<PathBuf>,
    /// Enables debug logging.
    #[arg(short, long, global = true, default_value_t)]
    pub(crate) verbose: bool,
    /// Emits logs as JSON lines.
    #[arg(long, global = true, default_value_t)]
    pub(crate) log_json: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Enqueue a job, e.g. '{"id":"job1","command":"echo hi"}'.
    Enqueue {
        /// Job as JSON with `id`, `command` and optional `max_retries`.
        job: String,
    },
    /// List jobs, newest first.
    List {
        /// Only show jobs in this state.
        #[arg(short, long)]
        state: Option<JobState>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show job counts per state and the number of running workers.
    Status,
    /// Show every field of one job.
    Info { id: String },
    /// Remove a job.
    Delete { id: String },
    /// Inspect and requeue dead jobs.
    #[command(subcommand)]
    Dlq(DlqCommand),
    /// Return jobs locked by crashed workers to pending.
    Cleanup {
        /// Lock age in seconds after which a lock counts as stale [default: lock_timeout].
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run and manage worker processes.
    #[command(subcommand)]
    Worker(WorkerCommand),
    /// Show or change settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub(crate) enum DlqCommand {
    /// List jobs in the dead-letter queue.
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Move a dead job back to pending.
    Retry { id: String },
}

#[derive(Subcommand, Debug)]
pub(crate) enum WorkerCommand {
    /// Run a worker in the foreground until SIGINT or SIGTERM.
    Run {
        /// Worker identifier [default: worker-<ulid>].
        #[arg(long)]
        id: Option<String>,
    },
    /// Start detached worker processes.
    Start {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    /// Signal all running workers to finish their current job and exit.
    Stop,
    /// List running workers.
    List,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigCommand {
    /// Print every setting.
    Show,
    /// Change one setting, e.g. `max-retries 5`.
    Set { key: String, value: String },
}
