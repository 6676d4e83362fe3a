//! Low-traffic window: a set of local wall-clock hours in a fixed timezone.

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use ferry_core::config::ScheduleConfig;
use std::time::Duration;

/// Hours are walked at most this far ahead before the window counts as
/// always open.
const HORIZON_HOURS: i64 = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct LowTrafficWindow {
    hours: [bool; 24],
    tz: Tz,
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

impl LowTrafficWindow {
    pub fn new(hours: &[u32], tz: Tz) -> Result<Self> {
        let mut set = [false; 24];
        for &h in hours {
            if h > 23 {
                return Err(SchedulerError::InvalidHour(h));
            }
            set[h as usize] = true;
        }
        Ok(Self { hours: set, tz })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::new(&config.low_traffic_hours, parse_timezone(&config.timezone)?)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn hours(&self) -> Vec<u32> {
        (0..24).filter(|h| self.hours[*h as usize]).collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.hours.iter().any(|h| *h)
    }

    fn is_always_open(&self) -> bool {
        self.hours.iter().all(|h| *h)
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        self.hours[local.hour() as usize]
    }

    /// Time left before the window closes. `Some(0)` outside the window,
    /// `None` when every hour is low-traffic.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.contains(now) {
            return Some(Duration::ZERO);
        }
        if self.is_always_open() {
            return None;
        }
        let top = top_of_hour(now, self.tz);
        (1..=HORIZON_HOURS)
            .map(|i| top + ChronoDuration::hours(i))
            .find(|t| !self.contains(*t))
            .map(|end| (end - now).to_std().unwrap_or_default())
    }

    /// Next instant at which the window opens, strictly after `now`.
    pub fn next_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_empty() || self.is_always_open() {
            return None;
        }
        let top = top_of_hour(now, self.tz);
        (1..=HORIZON_HOURS)
            .map(|i| top + ChronoDuration::hours(i))
            .find(|t| self.contains(*t) && !self.contains(*t - ChronoDuration::hours(1)))
    }

    /// Length of the longest contiguous run of hours, wrapping midnight.
    /// `None` when every hour is low-traffic.
    pub fn longest_block(&self) -> Option<Duration> {
        if self.is_always_open() {
            return None;
        }
        let mut best = 0u64;
        let mut run = 0u64;
        for i in 0..48 {
            if self.hours[i % 24] {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        Some(Duration::from_secs(best * 3600))
    }

    pub fn describe(&self) -> String {
        let hours: Vec<String> = self.hours().iter().map(|h| format!("{h:02}")).collect();
        format!("hours [{}] {}", hours.join(","), self.tz.name())
    }
}

/// Start of the local hour containing `now`, as a UTC instant. Works for
/// zones with half-hour offsets since the local minute is subtracted.
fn top_of_hour(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    now - ChronoDuration::minutes(local.minute() as i64)
        - ChronoDuration::seconds(local.second() as i64)
        - ChronoDuration::nanoseconds(local.nanosecond() as i64 % 1_000_000_000)
}
