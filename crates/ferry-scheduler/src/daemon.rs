//! The scheduling loop: wait for the trigger, gate on the low-traffic
//! window, launch one supervised worker at a time.

use crate::error::{Result, SchedulerError};
use crate::state::{JobStatus, ScheduleState, ScheduleStateStore};
use crate::supervisor::{self, is_pid_alive, JobOutcome, Limits, WorkerCommand};
use crate::trigger::Trigger;
use crate::window::{parse_timezone, LowTrafficWindow};
use chrono::{DateTime, Utc};
use ferry_core::config::{ConfigWarning, ScheduleConfig};
use ferry_core::duration::format_duration;
use ferry_core::io;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A tick that wakes up at most this late is evaluated at the instant the
/// trigger was due rather than at the wall clock.
const TICK_TOLERANCE: Duration = Duration::from_secs(5);

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ScheduleOverrides {
    pub cron: Option<String>,
    pub max_duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub trigger: Trigger,
    pub window: LowTrafficWindow,
    pub low_traffic_only: bool,
    pub limits: Limits,
    pub state_path: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub worker: WorkerCommand,
}

impl DaemonConfig {
    pub fn from_config(
        config: &ScheduleConfig,
        overrides: &ScheduleOverrides,
        worker: WorkerCommand,
    ) -> Result<Self> {
        let max_duration = match overrides.max_duration {
            Some(d) => d,
            None => config.max_duration()?,
        };
        Ok(Self {
            trigger: Trigger::from_config(config, overrides.cron.as_deref())?,
            window: LowTrafficWindow::from_config(config)?,
            low_traffic_only: config.low_traffic_only,
            limits: Limits {
                max_duration,
                grace_period: config.grace_period()?,
            },
            state_path: config.state_path.clone(),
            pid_file: Some(config.pid_file.clone()),
            worker,
        })
    }
}

/// Checks that need the scheduler's own parsers (timezone, cron).
pub fn validate_schedule(config: &ScheduleConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    let tz = match parse_timezone(&config.timezone) {
        Ok(tz) => tz,
        Err(e) => {
            warnings.push(ConfigWarning::error(format!("schedule.timezone: {e}")));
            return warnings;
        }
    };
    let cron = match Trigger::cron(&config.cron, tz) {
        Ok(t) => Some(t),
        Err(e) if config.poll_interval.is_some() => {
            warnings.push(ConfigWarning::warning(format!(
                "schedule.cron: {e} (ignored while poll_interval is set)"
            )));
            None
        }
        Err(e) => {
            warnings.push(ConfigWarning::error(format!("schedule.cron: {e}")));
            None
        }
    };

    // Hour range problems are reported by the core config checks.
    let (Ok(window), Ok(max_duration)) = (
        LowTrafficWindow::new(&config.low_traffic_hours, tz),
        config.max_duration(),
    ) else {
        return warnings;
    };
    if !config.low_traffic_only || window.is_empty() {
        return warnings;
    }

    if let Some(longest) = window.longest_block() {
        if longest < max_duration {
            warnings.push(ConfigWarning::error(format!(
                "schedule.max_duration {} exceeds the longest low-traffic block ({}); every run would be skipped",
                format_duration(max_duration),
                format_duration(longest)
            )));
        }
    }

    if let (Some(cron), None) = (&cron, &config.poll_interval) {
        let mut at = Utc::now();
        let mut fires_inside = false;
        for _ in 0..64 {
            let Some(next) = cron.next_after(at) else {
                break;
            };
            if window.contains(next) {
                fires_inside = true;
                break;
            }
            at = next;
        }
        if !fires_inside {
            warnings.push(ConfigWarning::warning(format!(
                "schedule.cron '{}' does not fire inside the low-traffic window ({})",
                config.cron,
                window.describe()
            )));
        }
    }
    warnings
}

// ─── Decision ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OutsideWindow,
    AlreadyRunning,
    InsufficientWindow { remaining: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Launch,
    Skip(SkipReason),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutsideWindow => write!(f, "outside the low-traffic window"),
            SkipReason::AlreadyRunning => write!(f, "a job is already running"),
            SkipReason::InsufficientWindow { remaining } => write!(
                f,
                "only {} of low-traffic time left",
                format_duration(Duration::from_secs(remaining.as_secs()))
            ),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Launch => write!(f, "launch"),
            Decision::Skip(reason) => write!(f, "skip: {reason}"),
        }
    }
}

/// The instant a fired trigger is judged at: its due time when the wake-up
/// landed within [`TICK_TOLERANCE`] of it, otherwise the wall clock.
pub fn evaluation_instant(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match due {
        Some(due) if (now - due).abs().to_std().is_ok_and(|d| d <= TICK_TOLERANCE) => due,
        _ => now,
    }
}

pub fn evaluate(
    state: &ScheduleState,
    window: &LowTrafficWindow,
    low_traffic_only: bool,
    max_duration: Duration,
    now: DateTime<Utc>,
) -> Decision {
    if low_traffic_only && !window.contains(now) {
        return Decision::Skip(SkipReason::OutsideWindow);
    }
    if state.is_running {
        return Decision::Skip(SkipReason::AlreadyRunning);
    }
    if low_traffic_only {
        if let Some(remaining) = window.remaining(now) {
            if remaining < max_duration {
                return Decision::Skip(SkipReason::InsufficientWindow { remaining });
            }
        }
    }
    Decision::Launch
}

// ─── Status ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub trigger: String,
    pub window: String,
    pub low_traffic_only: bool,
    pub window_open: bool,
    pub window_remaining: Option<String>,
    pub next_window_start: Option<DateTime<Utc>>,
    pub next_trigger: Option<DateTime<Utc>>,
    pub max_duration: String,
    pub decision: String,
    pub daemon_pid: Option<u32>,
    pub state: ScheduleState,
}

/// Snapshot for `ferry schedule` without `--daemon`. Reads, never writes.
pub fn status(config: &DaemonConfig, now: DateTime<Utc>) -> ScheduleStatus {
    let state = ScheduleStateStore::new(&config.state_path)
        .read()
        .ok()
        .flatten()
        .unwrap_or_default();
    let window_open = config.window.contains(now);
    let decision = evaluate(
        &state,
        &config.window,
        config.low_traffic_only,
        config.limits.max_duration,
        now,
    );
    ScheduleStatus {
        trigger: config.trigger.describe(),
        window: config.window.describe(),
        low_traffic_only: config.low_traffic_only,
        window_open,
        window_remaining: if window_open {
            Some(
                config
                    .window
                    .remaining(now)
                    .map(|d| format_duration(Duration::from_secs(d.as_secs() / 60 * 60)))
                    .unwrap_or_else(|| "unbounded".to_string()),
            )
        } else {
            None
        },
        next_window_start: config.window.next_start(now),
        next_trigger: config.trigger.next_after(now),
        max_duration: format_duration(config.limits.max_duration),
        decision: decision.to_string(),
        daemon_pid: config.pid_file.as_deref().and_then(live_pid),
        state,
    }
}

fn live_pid(path: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let pid = raw.trim().parse::<u32>().ok()?;
    is_pid_alive(pid).then_some(pid)
}

// ─── Pid file ───────────────────────────────────────────────────────────────

/// Held for the daemon's lifetime; removes the file on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn acquire(path: &Path) -> Result<Self> {
        let own = std::process::id();
        if let Some(pid) = live_pid(path) {
            if pid != own {
                return Err(SchedulerError::AlreadyRunning(pid));
            }
        }
        io::atomic_write(path, format!("{own}\n").as_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}

// ─── Daemon ─────────────────────────────────────────────────────────────────

pub struct ActiveJob {
    id: Uuid,
    handle: JoinHandle<JobOutcome>,
}

impl ActiveJob {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Daemon {
    config: DaemonConfig,
    store: ScheduleStateStore,
    state: ScheduleState,
    shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(config: DaemonConfig, shutdown: CancellationToken) -> Self {
        let store = ScheduleStateStore::new(&config.state_path);
        let state = store.load();
        Self {
            config,
            store,
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    fn save(&self) {
        self.store.save(&self.state);
    }

    /// Close out a persisted run whose worker is gone.
    pub fn recover(&mut self, now: DateTime<Utc>) -> bool {
        let stale = self.state.current_job_run.clone();
        if !self.state.recover_stale(is_pid_alive, now) {
            return false;
        }
        warn!(
            job_id = ?stale.as_ref().map(|r| r.id),
            pid = ?stale.as_ref().and_then(|r| r.pid),
            "previous run is no longer alive, marked failed"
        );
        self.save();
        true
    }

    /// Evaluate once and launch a worker when the gates allow it.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<ActiveJob> {
        let decision = evaluate(
            &self.state,
            &self.config.window,
            self.config.low_traffic_only,
            self.config.limits.max_duration,
            now,
        );
        match decision {
            Decision::Skip(reason) => {
                info!(reason = %reason, "skipping scheduled run");
                None
            }
            Decision::Launch => self.launch(now),
        }
    }

    fn launch(&mut self, now: DateTime<Utc>) -> Option<ActiveJob> {
        let id = Uuid::new_v4();
        match supervisor::spawn(id, &self.config.worker) {
            Ok(job) => {
                self.state.begin(id, job.pid(), now);
                self.save();
                info!(
                    job_id = %id,
                    pid = ?job.pid(),
                    max_duration = %format_duration(self.config.limits.max_duration),
                    "worker launched"
                );
                let handle = tokio::spawn(job.supervise(self.config.limits, self.shutdown.clone()));
                Some(ActiveJob { id, handle })
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "failed to launch worker");
                self.state.record_spawn_failure(id, &e.to_string(), now);
                self.save();
                None
            }
        }
    }

    /// Wait for a launched job and record its outcome.
    pub async fn wait(&mut self, job: ActiveJob) -> JobStatus {
        let outcome = join(job.handle).await;
        self.complete(job.id, outcome)
    }

    fn complete(&mut self, id: Uuid, outcome: JobOutcome) -> JobStatus {
        let status = self.state.complete(&outcome, Utc::now());
        match status {
            JobStatus::Succeeded => info!(
                job_id = %id,
                duration_ms = outcome.duration.as_millis() as u64,
                "worker finished"
            ),
            _ => warn!(
                job_id = %id,
                status = status.as_str(),
                detail = %outcome.describe(),
                "worker did not succeed"
            ),
        }
        self.save();
        status
    }

    /// Run until the shutdown token fires. A running worker is stopped
    /// with the same TERM/KILL escalation before returning.
    pub async fn run(mut self) -> Result<ScheduleState> {
        let _pid_file = match &self.config.pid_file {
            Some(path) => Some(PidFile::acquire(path)?),
            None => None,
        };

        self.recover(Utc::now());
        self.state.schedule = Some(self.config.trigger.describe());
        self.save();
        info!(
            trigger = %self.config.trigger.describe(),
            window = %self.config.window.describe(),
            low_traffic_only = self.config.low_traffic_only,
            "scheduler started"
        );

        let shutdown = self.shutdown.clone();
        let mut active: Option<ActiveJob> = None;
        let mut fired: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            let from = fired.map_or(now, |f| f.max(now));
            let next = self.config.trigger.next_after(from);
            if self.state.next_run != next {
                self.state.next_run = next;
                self.save();
            }
            let wait = next.map(|n| (n - now).to_std().unwrap_or_default());

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep_for(wait) => {
                    fired = next;
                    let now = Utc::now();
                    if active.is_none() {
                        self.recover(now);
                    }
                    if let Some(job) = self.tick(evaluation_instant(next, now)) {
                        active = Some(job);
                    }
                }
                outcome = join_active(&mut active) => {
                    if let Some(job) = active.take() {
                        self.complete(job.id, outcome);
                    }
                }
            }
        }

        if let Some(job) = active.take() {
            info!(job_id = %job.id, "stopping running worker before exit");
            self.wait(job).await;
        }
        self.save();
        info!("scheduler stopped");
        Ok(self.state)
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn join_active(active: &mut Option<ActiveJob>) -> JobOutcome {
    match active {
        Some(job) => join(&mut job.handle).await,
        None => std::future::pending().await,
    }
}

async fn join<F>(handle: F) -> JobOutcome
where
    F: std::future::Future<Output = std::result::Result<JobOutcome, tokio::task::JoinError>>,
{
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome::failed(format!("supervisor task failed: {e}"), Duration::ZERO),
    }
}
