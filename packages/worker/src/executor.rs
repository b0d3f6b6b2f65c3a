//! Command execution for jobs.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;

/// Exit status and captured streams of one command run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that could not be started at all.
    pub fn spawn_failure(error: impl ToString) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: error.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, or `None` when the command printed nothing.
    pub fn output(&self) -> Option<String> {
        let trimmed = self.stdout.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Failure detail: trimmed stderr, falling back to the exit code.
    pub fn error_message(&self) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.is_empty() {
            format!("command exited with code {}", self.exit_code)
        } else {
            trimmed.to_string()
        }
    }
}

/// Future type for async command runners.
pub type RunFuture = Pin<Box<dyn Future<Output = CommandOutput> + Send>>;

/// Executes a job's command.
///
/// Implementations never fail: spawn errors are reported as a
/// [`CommandOutput`] with a non-zero exit code.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: &str) -> RunFuture;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> RunFuture {
        let command = command.to_string();
        Box::pin(async move { run_shell(&command).await })
    }
}

async fn run_shell(command: &str) -> CommandOutput {
    let output = shell_command(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => CommandOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(error) => {
            tracing::warn!(%error, command, "failed to spawn command");
            CommandOutput::spawn_failure(error)
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// A closure-based command runner, mostly useful in tests.
pub struct FnRunner<F>
where
    F: Fn(&str) -> RunFuture + Send + Sync + 'static,
{
    runner: F,
}

impl<F> FnRunner<F>
where
    F: Fn(&str) -> RunFuture + Send + Sync + 'static,
{
    pub fn new(runner: F) -> Self {
        Self { runner }
    }
}

impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(&str) -> RunFuture + Send + Sync + 'static,
{
    fn run(&self, command: &str) -> RunFuture {
        (self.runner)(command)
    }
}
