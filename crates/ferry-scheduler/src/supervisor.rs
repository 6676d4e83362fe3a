//! Worker process supervision: spawn, forward output, enforce a deadline
//! with TERM, then KILL after a grace period.

use crate::error::{Result, SchedulerError};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Program and arguments for one worker run.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_duration: Duration,
    pub grace_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// `None` when the process ended by signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub forced_kill: bool,
    /// Set when the daemon stopped the job on its own shutdown.
    pub interrupted: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.error.is_none()
    }

    pub fn describe(&self) -> String {
        if let Some(e) = &self.error {
            return e.clone();
        }
        let exit = match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        match (self.timed_out, self.interrupted, self.forced_kill) {
            (true, _, true) => format!("exceeded max duration, killed after grace period ({exit})"),
            (true, _, false) => format!("exceeded max duration, stopped ({exit})"),
            (false, true, true) => format!("stopped on shutdown, killed after grace period ({exit})"),
            (false, true, false) => format!("stopped on shutdown ({exit})"),
            _ => exit,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_code: None,
            timed_out: false,
            forced_kill: false,
            interrupted: false,
            duration,
            error: Some(error.into()),
        }
    }
}

// ─── Running job ────────────────────────────────────────────────────────────

pub struct RunningJob {
    id: Uuid,
    child: Child,
    pid: Option<u32>,
    started: Instant,
    forwarders: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Deadline,
    Shutdown,
}

/// Spawn the worker with piped output. Each line is re-logged under the
/// job id.
pub fn spawn(id: Uuid, worker: &WorkerCommand) -> Result<RunningJob> {
    let mut cmd = Command::new(&worker.program);
    cmd.args(&worker.args)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &worker.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| SchedulerError::Spawn {
        program: worker.program.display().to_string(),
        source,
    })?;
    let pid = child.id();
    debug!(job_id = %id, pid = ?pid, command = %worker.display(), "worker spawned");

    let mut forwarders = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(job_id = %id, stream = "stdout", "{line}");
            }
        }));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(job_id = %id, stream = "stderr", "{line}");
            }
        }));
    }

    Ok(RunningJob {
        id,
        child,
        pid,
        started: Instant::now(),
        forwarders,
    })
}

impl RunningJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the worker. Past `max_duration`, or when `shutdown` fires,
    /// send TERM; still alive after `grace_period` means KILL.
    pub async fn supervise(mut self, limits: Limits, shutdown: CancellationToken) -> JobOutcome {
        let deadline = tokio::time::sleep(limits.max_duration);
        tokio::pin!(deadline);

        let reason = tokio::select! {
            status = self.child.wait() => return self.finish(status, None, false).await,
            _ = &mut deadline => StopReason::Deadline,
            _ = shutdown.cancelled() => StopReason::Shutdown,
        };

        warn!(
            job_id = %self.id,
            pid = ?self.pid,
            reason = ?reason,
            grace_ms = limits.grace_period.as_millis() as u64,
            "stopping worker"
        );
        self.terminate().await;

        match tokio::time::timeout(limits.grace_period, self.child.wait()).await {
            Ok(status) => self.finish(status, Some(reason), false).await,
            Err(_) => {
                warn!(job_id = %self.id, pid = ?self.pid, "worker ignored TERM, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(job_id = %self.id, error = %e, "kill failed");
                }
                let status = self.child.wait().await;
                self.finish(status, Some(reason), true).await
            }
        }
    }

    async fn terminate(&mut self) {
        match self.pid {
            Some(pid) => {
                if let Err(e) = terminate_pid(pid).await {
                    warn!(job_id = %self.id, pid, error = %e, "TERM failed, killing");
                    let _ = self.child.start_kill();
                }
            }
            None => {
                let _ = self.child.start_kill();
            }
        }
    }

    async fn finish(
        mut self,
        status: std::io::Result<ExitStatus>,
        stopped: Option<StopReason>,
        forced_kill: bool,
    ) -> JobOutcome {
        for handle in self.forwarders.drain(..) {
            let _ = handle.await;
        }
        let duration = self.started.elapsed();
        match status {
            Ok(status) => JobOutcome {
                exit_code: status.code(),
                timed_out: stopped == Some(StopReason::Deadline),
                forced_kill,
                interrupted: stopped == Some(StopReason::Shutdown),
                duration,
                error: None,
            },
            Err(e) => JobOutcome::failed(format!("failed to wait for worker: {e}"), duration),
        }
    }
}

// ─── Pid helpers ────────────────────────────────────────────────────────────

/// Liveness probe via `kill -0`.
pub fn is_pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Ask a process to stop with SIGTERM.
pub async fn terminate_pid(pid: u32) -> std::io::Result<()> {
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("kill -TERM {pid} exited with {status}")))
    }
}
