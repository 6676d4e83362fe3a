use crate::cmd::transfer::parse_duration_arg;
use crate::cmd::{cancel_on_signal, load_config, runtime};
use crate::output::{or_dash, print_fields, print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use clap::Args;
use ferry_core::config::Config;
use ferry_scheduler::{
    status, Daemon, DaemonConfig, ScheduleOverrides, ScheduleState, ScheduleStatus, WorkerCommand,
};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RECENT_ERRORS: usize = 5;

#[derive(Args, Debug, Clone, Default)]
pub struct ScheduleArgs {
    /// Run the scheduler in the foreground until SIGINT/SIGTERM
    #[arg(long)]
    pub daemon: bool,

    /// Cron expression (5 or 6 fields) overriding schedule.cron
    #[arg(long, value_name = "CRON")]
    pub schedule: Option<String>,

    /// Longest a run may take, e.g. 3h [default: schedule.max_duration]
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    pub max_duration: Option<Duration>,
}

pub fn run(config_path: &Path, args: ScheduleArgs, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, true)?;
    let overrides = ScheduleOverrides {
        cron: args.schedule.clone(),
        max_duration: args.max_duration,
    };
    let daemon_config =
        DaemonConfig::from_config(&config.schedule, &overrides, worker_command(&config)?)
            .context("invalid schedule")?;

    if !args.daemon {
        let snapshot = status(&daemon_config, Utc::now());
        if json {
            print_json(&snapshot)?;
        } else {
            print_status(&snapshot);
        }
        return Ok(());
    }

    let rt = runtime()?;
    let state = rt.block_on(async {
        let shutdown = CancellationToken::new();
        cancel_on_signal(shutdown.clone());
        Daemon::new(daemon_config, shutdown).run().await
    })?;

    if json {
        print_json(&state)?;
    }
    Ok(())
}

/// `ferry --config <path> transfer --batch-size=N --delay=MS --resume`, run
/// with the same binary from the config's directory.
pub fn worker_command(config: &Config) -> anyhow::Result<WorkerCommand> {
    let exe = std::env::current_exe().context("cannot locate the ferry executable")?;
    Ok(WorkerCommand::new(
        exe,
        [
            "--config".to_string(),
            config.path.display().to_string(),
            "transfer".to_string(),
            format!("--batch-size={}", config.transfer.batch_size),
            format!("--delay={}", config.transfer.delay_ms),
            "--resume".to_string(),
        ],
    )
    .current_dir(config.base_dir()))
}

fn print_status(s: &ScheduleStatus) {
    let window = if s.window_open {
        format!("{} (open, {} left)", s.window, or_dash(s.window_remaining.as_ref()))
    } else {
        format!("{} (closed)", s.window)
    };
    print_fields(&[
        ("trigger", s.trigger.clone()),
        ("window", window),
        ("low traffic only", s.low_traffic_only.to_string()),
        ("next window", or_dash(s.next_window_start)),
        ("next trigger", or_dash(s.next_trigger)),
        ("max duration", s.max_duration.clone()),
        ("decision now", s.decision.clone()),
        (
            "daemon",
            s.daemon_pid
                .map(|p| format!("running (pid {p})"))
                .unwrap_or_else(|| "not running".to_string()),
        ),
    ]);
    println!();
    print_state(&s.state);
}

pub fn print_state(state: &ScheduleState) {
    let current = state
        .current_job_run
        .as_ref()
        .map(|r| format!("{} since {} (pid {})", r.id, r.start_time, or_dash(r.pid)));
    let last = state
        .last_outcome
        .as_ref()
        .map(|o| format!("{} at {}: {}", o.status.as_str(), o.finished_at, o.message));
    print_fields(&[
        ("running", state.is_running.to_string()),
        ("current job", or_dash(current)),
        ("last run", or_dash(state.last_run)),
        ("next run", or_dash(state.next_run)),
        (
            "runs",
            format!(
                "{} total, {} succeeded, {} failed",
                state.total_runs, state.successful_runs, state.failed_runs
            ),
        ),
        ("last outcome", or_dash(last)),
    ]);

    if !state.errors.is_empty() {
        println!();
        let skip = state.errors.len().saturating_sub(RECENT_ERRORS);
        let rows = state.errors[skip..]
            .iter()
            .map(|e| vec![e.timestamp.to_rfc3339(), e.message.clone()])
            .collect();
        print_table(&["TIME", "ERROR"], rows);
    }
}
