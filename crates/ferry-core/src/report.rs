//! Read-only progress summary derived from a checkpoint.

use crate::checkpoint::{Checkpoint, ErrorEntry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

const RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_processed_id: i64,
    pub last_dependent_parent_id: i64,
    pub processed_primary: u64,
    pub total_primary: u64,
    pub processed_dependent: u64,
    pub total_dependent: u64,
    /// Percent of primary rows processed.
    pub completion: f64,
    /// Percent of processed objects (both kinds) that did not fail.
    pub success_rate: f64,
    /// Objects per minute since the run started.
    pub rate_per_minute: f64,
    pub eta: Option<DateTime<Utc>>,
    pub bytes_moved: u64,
    pub average_size: u64,
    pub recent_errors: Vec<ErrorEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    InProgress,
    Finished,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::NotStarted => "not started",
            RunState::InProgress => "in progress",
            RunState::Finished => "finished",
        }
    }
}

pub fn summarize(cp: &Checkpoint, now: DateTime<Utc>) -> ProgressSummary {
    let state = if cp.finished_at.is_some() {
        RunState::Finished
    } else if cp.started_at.is_some() {
        RunState::InProgress
    } else {
        RunState::NotStarted
    };

    let processed = cp.processed_primary + cp.processed_dependent;
    let failed = cp.failed_primary + cp.failed_dependent;
    let succeeded = cp.succeeded_primary + cp.succeeded_dependent;
    let total = cp.total_primary + cp.total_dependent;

    let completion = percent(cp.processed_primary, cp.total_primary);
    let success_rate = percent(processed.saturating_sub(failed), processed);

    let end = cp.finished_at.unwrap_or(now);
    let elapsed_min = cp
        .started_at
        .map(|s| (end - s).num_milliseconds().max(0) as f64 / 60_000.0)
        .unwrap_or(0.0);
    let rate_per_minute = if elapsed_min > 0.0 {
        processed as f64 / elapsed_min
    } else {
        0.0
    };

    let remaining = total.saturating_sub(processed);
    let eta = if state == RunState::InProgress && rate_per_minute > 0.0 && remaining > 0 {
        let minutes = remaining as f64 / rate_per_minute;
        // A stalled run can project past the representable date range.
        ChronoDuration::try_milliseconds((minutes * 60_000.0) as i64)
            .and_then(|left| now.checked_add_signed(left))
    } else {
        None
    };

    let skip = cp.errors.len().saturating_sub(RECENT_ERRORS);
    ProgressSummary {
        state,
        started_at: cp.started_at,
        finished_at: cp.finished_at,
        updated_at: cp.updated_at,
        last_processed_id: cp.last_processed_id,
        last_dependent_parent_id: cp.last_dependent_parent_id,
        processed_primary: cp.processed_primary,
        total_primary: cp.total_primary,
        processed_dependent: cp.processed_dependent,
        total_dependent: cp.total_dependent,
        completion,
        success_rate,
        rate_per_minute,
        eta,
        bytes_moved: cp.bytes_moved,
        average_size: if succeeded > 0 {
            cp.bytes_moved / succeeded
        } else {
            0
        },
        recent_errors: cp.errors[skip..].to_vec(),
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

/// `1536` -> `1.5 KiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_checkpoint_is_not_started() {
        let s = summarize(&Checkpoint::default(), Utc::now());
        assert_eq!(s.state, RunState::NotStarted);
        assert_eq!(s.completion, 0.0);
        assert!(s.eta.is_none());
    }

    #[test]
    fn stalled_run_has_no_eta() {
        let now = Utc::now();
        let cp = Checkpoint {
            started_at: Some(now - ChronoDuration::days(365)),
            total_primary: 1_000_000_000_000_000,
            processed_primary: 1,
            succeeded_primary: 1,
            ..Checkpoint::default()
        };
        let s = summarize(&cp, now);
        assert_eq!(s.state, RunState::InProgress);
        assert!(s.rate_per_minute > 0.0);
        assert!(s.eta.is_none());
    }

    #[test]
    fn in_progress_run_has_rate_and_eta() {
        let now = Utc::now();
        let cp = Checkpoint {
            started_at: Some(now - ChronoDuration::minutes(10)),
            total_primary: 100,
            processed_primary: 50,
            succeeded_primary: 45,
            failed_primary: 5,
            bytes_moved: 4500,
            ..Checkpoint::default()
        };
        let s = summarize(&cp, now);
        assert_eq!(s.state, RunState::InProgress);
        assert_eq!(s.completion, 50.0);
        assert_eq!(s.success_rate, 90.0);
        assert!((s.rate_per_minute - 5.0).abs() < 1e-9);
        let eta = s.eta.unwrap();
        assert!((eta - now - ChronoDuration::minutes(10)).num_seconds().abs() <= 1);
        assert_eq!(s.average_size, 100);
    }

    #[test]
    fn only_last_ten_errors_are_shown() {
        let mut cp = Checkpoint::default();
        for i in 0..15 {
            cp.push_error(format!("e{i}"), None);
        }
        let s = summarize(&cp, Utc::now());
        assert_eq!(s.recent_errors.len(), 10);
        assert_eq!(s.recent_errors[0].message, "e5");
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
