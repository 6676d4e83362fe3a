//! What makes the daemon evaluate: a cron expression or a fixed interval.

use crate::error::{Result, SchedulerError};
use crate::window::parse_timezone;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use ferry_core::config::ScheduleConfig;
use ferry_core::duration::format_duration;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Trigger {
    Cron {
        expr: String,
        schedule: Box<Schedule>,
        tz: Tz,
    },
    Interval(Duration),
}

impl Trigger {
    /// Accepts 5 fields (min..dow) or 6 fields (sec..dow).
    pub fn cron(expr: &str, tz: Tz) -> Result<Self> {
        let invalid = |reason: &str| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };
        let normalized = match expr.split_whitespace().count() {
            5 => format!("0 {}", expr.trim()),
            6 => expr.trim().to_string(),
            _ => {
                return Err(invalid(
                    "expected 5 fields (min..dow) or 6 fields (sec..dow)",
                ))
            }
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(&e.to_string()))?;
        Ok(Trigger::Cron {
            expr: expr.trim().to_string(),
            schedule: Box::new(schedule),
            tz,
        })
    }

    pub fn interval(every: Duration) -> Result<Self> {
        if every.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        Ok(Trigger::Interval(every))
    }

    /// `cron_override` wins, then `poll_interval`, then `cron`.
    pub fn from_config(config: &ScheduleConfig, cron_override: Option<&str>) -> Result<Self> {
        let tz = parse_timezone(&config.timezone)?;
        if let Some(expr) = cron_override {
            return Self::cron(expr, tz);
        }
        match config.poll_interval()? {
            Some(every) => Self::interval(every),
            None => Self::cron(&config.cron, tz),
        }
    }

    /// First firing strictly after `after`. `None` when a cron expression
    /// has no future occurrence.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron { schedule, tz, .. } => schedule
                .after(&after.with_timezone(tz))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Trigger::Interval(every) => {
                ChronoDuration::from_std(*every).ok().map(|d| after + d)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron { expr, tz, .. } => format!("cron '{expr}' ({})", tz.name()),
            Trigger::Interval(every) => format!("every {}", format_duration(*every)),
        }
    }
}
