//! Command implementations. Output is plain text on stdout.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use db::JobQueue;
use queue_core::{Job, JobId, JobState, NewJob};
use worker::{CancellationToken, Supervisor, Worker, WorkerRegistry, generate_worker_id};

use crate::args::{Args, Command, ConfigCommand, DlqCommand, WorkerCommand};
use crate::settings::{self, Settings};

struct Session {
    dir: PathBuf,
    settings: Settings,
    verbose: bool,
}

pub(crate) async fn run(args: Args) -> Result<()> {
    let dir = args.config_dir.unwrap_or_else(settings::default_dir);
    let settings = Settings::load(&dir)
        .with_context(|| format!("loading settings from {}", dir.display()))?;
    let ctx = Session {
        dir,
        settings,
        verbose: args.verbose,
    };

    match args.command {
        Command::Enqueue { job } => enqueue(&ctx, &job).await,
        Command::List { state, limit } => list(&ctx, state, limit).await,
        Command::Status => status(&ctx).await,
        Command::Info { id } => info(&ctx, &id).await,
        Command::Delete { id } => delete(&ctx, &id).await,
        Command::Dlq(DlqCommand::List { limit }) => dlq_list(&ctx, limit).await,
        Command::Dlq(DlqCommand::Retry { id }) => dlq_retry(&ctx, &id).await,
        Command::Cleanup { timeout } => cleanup(&ctx, timeout).await,
        Command::Worker(WorkerCommand::Run { id }) => run_worker(&ctx, id).await,
        Command::Worker(WorkerCommand::Start { count }) => start_workers(&ctx, count).await,
        Command::Worker(WorkerCommand::Stop) => stop_workers(&ctx).await,
        Command::Worker(WorkerCommand::List) => list_workers(&ctx).await,
        Command::Config(ConfigCommand::Show) => show_config(&ctx),
        Command::Config(ConfigCommand::Set { key, value }) => set_config(ctx, &key, &value),
    }
}

async fn open_queue(ctx: &Session) -> Result<JobQueue> {
    let db_config = ctx.settings.db_config();
    let store = db::open(&db_config)
        .await
        .with_context(|| format!("opening job store at {}", db_config.endpoint))?;
    Ok(JobQueue::new(store, ctx.settings.queue_config()))
}

fn supervisor(ctx: &Session) -> Result<Supervisor> {
    let program = std::env::current_exe().context("locating the queuectl executable")?;

    let mut args: Vec<OsString> = vec![
        "--config-dir".into(),
        ctx.dir.clone().into_os_string(),
        "--log-json".into(),
    ];
    if ctx.verbose {
        args.push("--verbose".into());
    }
    args.extend(["worker".into(), "run".into()]);

    Ok(Supervisor::new(WorkerRegistry::new(&ctx.dir), program)
        .with_args(args)
        .with_log_dir(ctx.dir.join("logs")))
}

async fn enqueue(ctx: &Session, json: &str) -> Result<()> {
    let new_job = NewJob::from_json(json)?;
    let queue = open_queue(ctx).await?;
    let job = queue.enqueue(new_job).await.context("failed to enqueue job")?;

    println!("Job '{}' enqueued", job.id);
    println!("  Command:     {}", job.command);
    println!("  State:       {}", job.state);
    println!("  Max retries: {}", job.max_retries);
    Ok(())
}

async fn list(ctx: &Session, state: Option<JobState>, limit: usize) -> Result<()> {
    let queue = open_queue(ctx).await?;
    let jobs = queue.list_jobs(state, limit).await?;

    if jobs.is_empty() {
        match state {
            Some(state) => println!("No jobs with state '{state}'"),
            None => println!("No jobs found"),
        }
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<30} {:<10} {:<20}",
        "ID", "STATE", "COMMAND", "ATTEMPTS", "CREATED AT"
    );
    for job in &jobs {
        println!(
            "{:<20} {:<12} {:<30} {:<10} {:<20}",
            job.id.as_str(),
            job.state.as_str(),
            truncate(&job.command, 30),
            format!("{}/{}", job.attempts, job.max_retries),
            format_time(job.created_at),
        );
    }
    Ok(())
}

async fn status(ctx: &Session) -> Result<()> {
    let queue = open_queue(ctx).await?;
    let status = queue.get_status().await?;
    let workers = supervisor(ctx)?.running().await?;

    println!("Jobs");
    println!("  Total:      {}", status.total);
    for state in JobState::ALL {
        let label = format!("{}:", capitalize(state.as_str()));
        println!("  {label:<11} {}", status.count(state));
    }
    println!("Workers");
    println!("  Active:     {}", workers.len());
    Ok(())
}

async fn info(ctx: &Session, id: &str) -> Result<()> {
    let queue = open_queue(ctx).await?;
    let Some(job) = queue.get_job(&JobId::from(id)).await? else {
        bail!("job '{id}' not found");
    };
    print_job(&job);
    Ok(())
}

fn print_job(job: &Job) {
    println!("ID:          {}", job.id);
    println!("Command:     {}", job.command);
    println!("State:       {}", job.state);
    println!("Attempts:    {}/{}", job.attempts, job.max_retries);
    println!("Created at:  {}", format_time(job.created_at));
    println!("Updated at:  {}", format_time(job.updated_at));
    if let Some(worker) = &job.locked_by {
        println!("Locked by:   {worker}");
    }
    if let Some(locked_at) = job.locked_at {
        println!("Locked at:   {}", format_time(locked_at));
    }
    if let Some(next_retry_at) = job.next_retry_at {
        println!("Next retry:  {}", format_time(next_retry_at));
    }
    if let Some(error) = &job.error {
        println!("Error:       {error}");
    }
    if let Some(output) = &job.output {
        println!("Output:      {output}");
    }
}

async fn delete(ctx: &Session, id: &str) -> Result<()> {
    let queue = open_queue(ctx).await?;
    if !queue.delete_job(&JobId::from(id)).await? {
        bail!("job '{id}' not found");
    }
    println!("Job '{id}' deleted");
    Ok(())
}

async fn dlq_list(ctx: &Session, limit: usize) -> Result<()> {
    let queue = open_queue(ctx).await?;
    let jobs = queue.list_dead(limit).await?;

    if jobs.is_empty() {
        println!("Dead-letter queue is empty");
        return Ok(());
    }

    println!(
        "{:<20} {:<30} {:<10} {:<30}",
        "ID", "COMMAND", "ATTEMPTS", "ERROR"
    );
    for job in &jobs {
        println!(
            "{:<20} {:<30} {:<10} {:<30}",
            job.id.as_str(),
            truncate(&job.command, 30),
            job.attempts,
            truncate(job.error.as_deref().unwrap_or("-"), 30),
        );
    }
    Ok(())
}

async fn dlq_retry(ctx: &Session, id: &str) -> Result<()> {
    let queue = open_queue(ctx).await?;
    if !queue.retry_dlq_job(&JobId::from(id)).await? {
        bail!("job '{id}' is not in the dead-letter queue");
    }
    println!("Job '{id}' moved back to pending");
    Ok(())
}

async fn cleanup(ctx: &Session, timeout: Option<u64>) -> Result<()> {
    let queue = open_queue(ctx).await?;
    let reset = match timeout {
        Some(secs) => {
            queue
                .store()
                .cleanup_stale_locks(Duration::from_secs(secs))
                .await?
        }
        None => queue.recover_stale_locks().await?,
    };
    println!("Reset {reset} stale lock(s)");
    Ok(())
}

async fn run_worker(ctx: &Session, id: Option<String>) -> Result<()> {
    let queue = open_queue(ctx).await?;
    let worker = Worker::new(id.unwrap_or_else(generate_worker_id), queue);

    let shutdown = CancellationToken::new();
    watch_signals(shutdown.clone());

    worker
        .run(shutdown)
        .await
        .with_context(|| format!("worker {} stopped", worker.id()))
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn watch_signals(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown requested, finishing current job");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            tracing::warn!(%error, "cannot listen for SIGTERM");
            return wait_for_ctrl_c().await;
        }
    };
    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "cannot listen for ctrl-c");
    }
}

async fn start_workers(ctx: &Session, count: usize) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let started = supervisor(ctx)?
        .start(count)
        .await
        .context("failed to start workers")?;

    println!("Started {} worker(s)", started.len());
    for worker in &started {
        println!("  {} (pid {})", worker.id, worker.pid);
    }
    Ok(())
}

async fn stop_workers(ctx: &Session) -> Result<()> {
    let stopped = supervisor(ctx)?.stop().await?;
    if stopped == 0 {
        println!("No workers were running");
    } else {
        println!("Signalled {stopped} worker(s) to stop");
    }
    Ok(())
}

async fn list_workers(ctx: &Session) -> Result<()> {
    let workers = supervisor(ctx)?.running().await?;
    if workers.is_empty() {
        println!("No workers are running");
        return Ok(());
    }

    println!("{:<34} {:<10} {:<20}", "ID", "PID", "STARTED AT");
    for worker in &workers {
        println!(
            "{:<34} {:<10} {:<20}",
            worker.id,
            worker.pid,
            format_time(worker.started_at)
        );
    }
    Ok(())
}

fn show_config(ctx: &Session) -> Result<()> {
    println!("# {}", ctx.dir.join(settings::SETTINGS_FILE).display());
    for (key, value) in ctx.settings.entries() {
        println!("{key} = {value}");
    }
    Ok(())
}

fn set_config(mut ctx: Session, key: &str, value: &str) -> Result<()> {
    ctx.settings.set(key, value)?;
    ctx.settings
        .save(&ctx.dir)
        .with_context(|| format!("saving settings to {}", ctx.dir.display()))?;
    println!("Updated {} = {}", key.replace('-', "_"), value.trim());
    Ok(())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Shorten to at most `width` characters, marking the cut with `...`.
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text_and_marks_cuts() {
        assert_eq!(truncate("echo hi", 30), "echo hi");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn capitalize_first_letter() {
        assert_eq!(capitalize("pending"), "Pending");
        assert_eq!(capitalize(""), "");
    }
}
