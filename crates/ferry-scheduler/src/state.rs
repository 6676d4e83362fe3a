//! Persisted daemon state, written only by the daemon.

use crate::supervisor::JobOutcome;
use chrono::{DateTime, Utc};
use ferry_core::{io, paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use uuid::Uuid;

pub const SCHEDULE_ERROR_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleError {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleState {
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub current_job_run: Option<JobRun>,
    pub schedule: Option<String>,
    pub last_outcome: Option<LastOutcome>,
    pub errors: Vec<ScheduleError>,
}

impl ScheduleState {
    pub fn begin(&mut self, id: Uuid, pid: Option<u32>, now: DateTime<Utc>) {
        self.is_running = true;
        self.last_run = Some(now);
        self.current_job_run = Some(JobRun {
            id,
            start_time: now,
            pid,
            status: JobStatus::Running,
        });
    }

    /// Close out the current run. Returns the terminal status recorded.
    pub fn complete(&mut self, outcome: &JobOutcome, now: DateTime<Utc>) -> JobStatus {
        let status = if outcome.succeeded() {
            JobStatus::Succeeded
        } else if outcome.timed_out {
            JobStatus::TimedOut
        } else {
            JobStatus::Failed
        };
        let job_id = self
            .current_job_run
            .take()
            .map(|run| run.id)
            .unwrap_or_else(Uuid::nil);
        self.finish(
            job_id,
            status,
            outcome.exit_code,
            outcome.duration.as_millis() as u64,
            outcome.describe(),
            now,
        );
        status
    }

    /// A worker that could not be started still counts as a failed run.
    pub fn record_spawn_failure(&mut self, job_id: Uuid, message: &str, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.current_job_run = None;
        self.finish(job_id, JobStatus::Failed, None, 0, message.to_string(), now);
    }

    /// Close out a persisted run whose process is gone, e.g. after the
    /// daemon itself was killed.
    pub fn recover_stale(&mut self, is_alive: impl Fn(u32) -> bool, now: DateTime<Utc>) -> bool {
        let Some(run) = &self.current_job_run else {
            if self.is_running {
                self.is_running = false;
                return true;
            }
            return false;
        };
        if run.pid.is_some_and(&is_alive) {
            return false;
        }
        let id = run.id;
        let duration_ms = (now - run.start_time).num_milliseconds().max(0) as u64;
        self.current_job_run = None;
        self.finish(
            id,
            JobStatus::Failed,
            None,
            duration_ms,
            "interrupted by daemon restart".to_string(),
            now,
        );
        true
    }

    fn finish(
        &mut self,
        job_id: Uuid,
        status: JobStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
        message: String,
        now: DateTime<Utc>,
    ) {
        self.is_running = false;
        self.total_runs += 1;
        if status == JobStatus::Succeeded {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
            self.push_error(format!("{}: {message}", status.as_str()), Some(job_id), now);
        }
        self.last_outcome = Some(LastOutcome {
            job_id,
            status,
            exit_code,
            finished_at: now,
            duration_ms,
            message,
        });
    }

    pub fn push_error(&mut self, message: impl Into<String>, job_id: Option<Uuid>, now: DateTime<Utc>) {
        self.errors.push(ScheduleError {
            timestamp: now,
            message: message.into(),
            job_id,
        });
        if self.errors.len() > SCHEDULE_ERROR_CAPACITY {
            let excess = self.errors.len() - SCHEDULE_ERROR_CAPACITY;
            self.errors.drain(..excess);
        }
    }
}

// ─── Store ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScheduleStateStore {
    path: PathBuf,
}

impl ScheduleStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file yields a default state; an unreadable one is moved aside.
    pub fn load(&self) -> ScheduleState {
        match io::read_json::<ScheduleState>(&self.path) {
            Ok(Some(state)) => state,
            Ok(None) => ScheduleState::default(),
            Err(e) => {
                let aside = paths::corrupt_sibling(&self.path);
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "schedule state unreadable, starting fresh"
                );
                if let Err(e) = std::fs::rename(&self.path, &aside) {
                    warn!(error = %e, "could not move corrupt schedule state aside");
                }
                ScheduleState::default()
            }
        }
    }

    pub fn read(&self) -> ferry_core::Result<Option<ScheduleState>> {
        io::read_json(&self.path)
    }

    pub fn save(&self, state: &ScheduleState) {
        if let Err(e) = io::write_json(&self.path, state) {
            error!(path = %self.path.display(), error = %e, "failed to persist schedule state");
        }
    }
}
