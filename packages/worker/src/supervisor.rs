//! Starting and stopping detached worker processes.

use std::ffi::OsString;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use chrono::Utc;

use crate::error::RegistryError;
use crate::registry::{WorkerEntry, WorkerRegistry};
use crate::worker::generate_worker_id;

/// Manages worker processes through a [`WorkerRegistry`].
///
/// Each worker is spawned as `<program> <args..> --id <worker-id>`, detached
/// from the caller's process group so terminal signals do not reach it.
pub struct Supervisor {
    registry: WorkerRegistry,
    program: PathBuf,
    args: Vec<OsString>,
    log_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(registry: WorkerRegistry, program: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            program: program.into(),
            args: Vec::new(),
            log_dir: None,
        }
    }

    /// Arguments placed before `--id <worker-id>`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Send each worker's stdout and stderr to `<dir>/<worker-id>.log`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Spawn `count` workers and record them.
    pub async fn start(&self, count: usize) -> Result<Vec<WorkerEntry>, RegistryError> {
        let mut started = Vec::with_capacity(count);

        for _ in 0..count {
            let id = generate_worker_id();
            let (stdout, stderr) = self.output_for(&id)?;

            let mut command = Command::new(&self.program);
            command
                .args(&self.args)
                .arg("--id")
                .arg(&id)
                .stdin(Stdio::null())
                .stdout(stdout)
                .stderr(stderr);
            detach(&mut command);

            let child = command.spawn()?;
            tracing::info!(worker_id = %id, pid = child.id(), "started worker process");
            started.push(WorkerEntry {
                id,
                pid: child.id(),
                started_at: Utc::now(),
            });
        }

        self.registry.add(started.iter().cloned()).await?;
        Ok(started)
    }

    fn output_for(&self, id: &str) -> Result<(Stdio, Stdio), RegistryError> {
        let Some(dir) = &self.log_dir else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        std::fs::create_dir_all(dir)?;
        let log = File::create(dir.join(format!("{id}.log")))?;
        Ok((Stdio::from(log.try_clone()?), Stdio::from(log)))
    }

    /// Recorded workers whose process is still alive.
    pub async fn running(&self) -> Result<Vec<WorkerEntry>, RegistryError> {
        let entries = self.registry.load().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| is_alive(entry.pid))
            .collect())
    }

    /// Ask every live worker to stop and clear the registry.
    ///
    /// Workers finish their current job before exiting. Returns how many
    /// were signalled.
    pub async fn stop(&self) -> Result<usize, RegistryError> {
        let mut stopped = 0;
        for entry in self.running().await? {
            match terminate(entry.pid) {
                Ok(()) => {
                    tracing::info!(worker_id = %entry.id, pid = entry.pid, "sent stop signal");
                    stopped += 1;
                }
                Err(error) => {
                    tracing::warn!(worker_id = %entry.id, pid = entry.pid, %error, "failed to stop worker");
                }
            }
        }
        self.registry.clear().await?;
        Ok(stopped)
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<(), RegistryError> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(windows)]
fn is_alive(pid: u32) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}")])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

#[cfg(windows)]
fn terminate(pid: u32) -> Result<(), RegistryError> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .output()?
        .status;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("taskkill exited with {status}")).into())
    }
}
