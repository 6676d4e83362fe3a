use crate::cmd::{cancel_on_signal, load_config, runtime, Interrupted};
use crate::output::{print_fields, print_json};
use anyhow::Context;
use clap::Args;
use ferry_core::duration::{format_duration, parse_duration};
use ferry_core::endpoints::Endpoints;
use ferry_core::engine::{RunReport, RunStatus, TransferEngine, TransferOptions};
use ferry_core::report::human_bytes;
use ferry_core::retry::RetryPolicy;
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Rows per batch [default: transfer.batch_size]
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Pause between batches; a bare number is milliseconds [default: transfer.delay_ms]
    #[arg(long, value_name = "MS", value_parser = parse_duration_arg)]
    pub delay: Option<Duration>,

    /// Read and compare only; nothing is written to the destination
    #[arg(long)]
    pub dry_run: bool,

    /// Continue from the saved checkpoint instead of starting over
    #[arg(long)]
    pub resume: bool,

    /// Skip the dependent pass
    #[arg(long, conflicts_with = "dependents_only")]
    pub primary_only: bool,

    /// Skip the primary pass
    #[arg(long)]
    pub dependents_only: bool,

    /// Transfers in flight within a batch [default: transfer.concurrency]
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
}

pub fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

impl TransferArgs {
    fn apply(&self, opts: &mut TransferOptions) {
        if let Some(n) = self.batch_size {
            opts.batch_size = n;
        }
        if let Some(d) = self.delay {
            opts.inter_batch_delay = d;
        }
        if let Some(n) = self.concurrency {
            opts.concurrency = n;
        }
        opts.dry_run = self.dry_run;
        opts.resume = self.resume;
        opts.primary_only = self.primary_only;
        opts.dependents_only = self.dependents_only;
    }
}

pub fn run(config_path: &Path, args: TransferArgs, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path, false)?;
    let mut opts = TransferOptions::from_config(&config.transfer);
    args.apply(&mut opts);
    opts.validate()?;

    let retry = RetryPolicy::new(
        config.transfer.max_retries,
        Duration::from_millis(config.transfer.retry_base_delay_ms),
    );
    let show_progress = !json && std::io::stdout().is_terminal();

    let rt = runtime()?;
    let report = rt.block_on(async {
        let endpoints = Endpoints::connect(&config)
            .await
            .context("failed to open catalog or stores")?;

        let cancel = CancellationToken::new();
        cancel_on_signal(cancel.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = TransferEngine::new(
            endpoints.catalog,
            endpoints.source,
            endpoints.destination,
            config.checkpoint_path(),
        )
        .with_retry(retry)
        .with_cancellation(cancel)
        .with_progress(tx);

        let printer = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                if show_progress {
                    println!(
                        "{} batch {}: cursor {}, {} processed ({} ok, {} skipped, {} failed)",
                        p.pass,
                        p.batch,
                        p.cursor,
                        p.counters.processed,
                        p.counters.succeeded,
                        p.counters.skipped,
                        p.counters.failed
                    );
                }
            }
        });

        let report = engine.run(&opts).await;
        drop(engine);
        let _ = printer.await;
        report.context("transfer failed")
    })?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if report.status == RunStatus::Interrupted {
        return Err(Interrupted(format!(
            "progress saved to {}; rerun with --resume to continue",
            report.checkpoint_path.display()
        ))
        .into());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let cp = &report.checkpoint;
    let status = match (report.status, report.dry_run) {
        (RunStatus::Completed, false) => "completed",
        (RunStatus::Completed, true) => "completed (dry run)",
        (RunStatus::Interrupted, false) => "interrupted",
        (RunStatus::Interrupted, true) => "interrupted (dry run)",
    };
    print_fields(&[
        ("status", status.to_string()),
        ("checkpoint", report.checkpoint_path.display().to_string()),
        ("batches", report.batches.to_string()),
        (
            "elapsed",
            format_duration(Duration::from_secs(report.elapsed_ms / 1000)),
        ),
        (
            "primary",
            format!(
                "{}/{} processed: {} copied, {} skipped, {} failed",
                cp.processed_primary,
                cp.total_primary,
                cp.succeeded_primary,
                cp.skipped_primary,
                cp.failed_primary
            ),
        ),
        (
            "dependent",
            format!(
                "{}/{} processed: {} copied, {} skipped, {} failed",
                cp.processed_dependent,
                cp.total_dependent,
                cp.succeeded_dependent,
                cp.skipped_dependent,
                cp.failed_dependent
            ),
        ),
        ("last id", cp.last_processed_id.to_string()),
        ("moved", human_bytes(cp.bytes_moved)),
        ("errors", cp.errors.len().to_string()),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let mut opts = TransferOptions::default();
        let args = TransferArgs {
            batch_size: Some(7),
            delay: Some(Duration::from_millis(250)),
            resume: true,
            primary_only: true,
            ..TransferArgs::default()
        };
        args.apply(&mut opts);
        assert_eq!(opts.batch_size, 7);
        assert_eq!(opts.inter_batch_delay, Duration::from_millis(250));
        assert!(opts.resume);
        assert!(opts.primary_only);
        assert_eq!(opts.concurrency, 1);
    }

    #[test]
    fn delay_accepts_bare_millis_and_units() {
        assert_eq!(parse_duration_arg("2000"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration_arg("1s"), Ok(Duration::from_secs(1)));
        assert!(parse_duration_arg("soon").is_err());
    }
}
