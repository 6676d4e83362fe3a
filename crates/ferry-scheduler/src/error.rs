use ferry_core::FerryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid low-traffic hour {0}: hours are 0-23")]
    InvalidHour(u32),

    #[error("poll interval must be greater than zero")]
    ZeroInterval,

    #[error("another scheduler is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] FerryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
