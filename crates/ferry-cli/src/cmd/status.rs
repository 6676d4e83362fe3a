use crate::cmd::schedule::print_state;
use crate::output::{or_dash, print_fields, print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use ferry_core::checkpoint::CheckpointStore;
use ferry_core::config::Config;
use ferry_core::report::{human_bytes, summarize, ProgressSummary};
use ferry_scheduler::ScheduleStateStore;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    checkpoint_path: PathBuf,
    checkpoint: Option<ProgressSummary>,
    schedule_state_path: PathBuf,
    schedule: Option<ferry_scheduler::ScheduleState>,
}

/// Read-only: neither file is created or repaired.
pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;
    let now = Utc::now();

    let checkpoint = CheckpointStore::new(config.checkpoint_path())
        .read()
        .with_context(|| format!("cannot read {}", config.checkpoint_path().display()))?
        .map(|cp| summarize(&cp, now));
    let schedule = ScheduleStateStore::new(&config.schedule.state_path)
        .read()
        .with_context(|| format!("cannot read {}", config.schedule.state_path.display()))?;

    let report = StatusReport {
        checkpoint_path: config.checkpoint_path().to_path_buf(),
        checkpoint,
        schedule_state_path: config.schedule.state_path.clone(),
        schedule,
    };

    if json {
        return print_json(&report);
    }

    println!("Migration ({})", report.checkpoint_path.display());
    match &report.checkpoint {
        Some(s) => print_summary(s),
        None => println!("  no checkpoint yet; run 'ferry transfer'"),
    }
    println!();
    println!("Scheduler ({})", report.schedule_state_path.display());
    match &report.schedule {
        Some(state) => print_state(state),
        None => println!("  scheduler has not run"),
    }
    Ok(())
}

fn print_summary(s: &ProgressSummary) {
    print_fields(&[
        ("state", s.state.as_str().to_string()),
        ("started", or_dash(s.started_at)),
        ("finished", or_dash(s.finished_at)),
        ("updated", or_dash(s.updated_at)),
        (
            "primary",
            format!(
                "{}/{} ({:.1}%), cursor {}",
                s.processed_primary, s.total_primary, s.completion, s.last_processed_id
            ),
        ),
        (
            "dependent",
            format!(
                "{}/{}, cursor {}",
                s.processed_dependent, s.total_dependent, s.last_dependent_parent_id
            ),
        ),
        ("success rate", format!("{:.1}%", s.success_rate)),
        ("rate", format!("{:.1} objects/min", s.rate_per_minute)),
        ("eta", or_dash(s.eta)),
        (
            "moved",
            format!(
                "{} (avg {})",
                human_bytes(s.bytes_moved),
                human_bytes(s.average_size)
            ),
        ),
    ]);

    if !s.recent_errors.is_empty() {
        println!();
        let rows = s
            .recent_errors
            .iter()
            .map(|e| {
                vec![
                    e.timestamp.to_rfc3339(),
                    e.context.clone().unwrap_or_default(),
                    e.message.clone(),
                ]
            })
            .collect();
        print_table(&["TIME", "OBJECT", "ERROR"], rows);
    }
}
