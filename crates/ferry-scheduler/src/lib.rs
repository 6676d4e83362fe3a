//! `ferry-scheduler`: runs `ferry transfer` inside a maintenance window.
//!
//! ```text
//! Trigger (cron | interval)
//!     │ fires
//!     ▼
//! evaluate()  ← LowTrafficWindow + ScheduleState.isRunning + max duration
//!     │ Launch
//!     ▼
//! supervisor  ← spawns the worker, forwards its output into tracing,
//!     │          TERM at the deadline, KILL after the grace period
//!     ▼
//! ScheduleState (atomic JSON, written only by the daemon)
//! ```

pub mod daemon;
pub mod error;
pub mod state;
pub mod supervisor;
pub mod trigger;
pub mod window;

#[cfg(test)]
mod tests;

pub use daemon::{
    evaluate, status, validate_schedule, Daemon, DaemonConfig, Decision, ScheduleOverrides,
    ScheduleStatus, SkipReason,
};
pub use error::{Result, SchedulerError};
pub use state::{JobStatus, ScheduleState, ScheduleStateStore};
pub use supervisor::{JobOutcome, Limits, WorkerCommand};
pub use trigger::Trigger;
pub use window::LowTrafficWindow;
