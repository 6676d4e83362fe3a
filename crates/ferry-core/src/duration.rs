//! Human duration strings: `90s`, `45m`, `3h`, `1500ms`. A bare number is milliseconds.

use crate::error::{FerryError, Result};
use std::time::Duration;

pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let invalid = || FerryError::InvalidDuration(input.to_string());
    if s.is_empty() {
        return Err(invalid());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    let millis = match unit.trim() {
        "" | "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis.round() as u64))
}

/// Inverse of [`parse_duration`] for whole units; used in status output and config files.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    if ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}
