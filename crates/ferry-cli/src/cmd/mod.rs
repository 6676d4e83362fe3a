pub mod config;
pub mod schedule;
pub mod status;
pub mod transfer;
pub mod verify;

use anyhow::Context;
use ferry_core::config::{Config, ConfigWarning, WarnLevel};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Returned by commands stopped by SIGINT/SIGTERM; `main` maps it to exit 130.
#[derive(Debug)]
pub struct Interrupted(pub String);

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interrupted: {}", self.0)
    }
}

impl std::error::Error for Interrupted {}

/// Core checks plus, when `with_schedule`, the scheduler's cron/timezone checks.
pub fn collect_warnings(config: &Config, with_schedule: bool) -> Vec<ConfigWarning> {
    let mut warnings = config.validate();
    if with_schedule {
        warnings.extend(ferry_scheduler::validate_schedule(&config.schedule));
    }
    warnings
}

/// Load and validate. Warnings are logged; errors abort.
pub fn load_config(path: &Path, with_schedule: bool) -> anyhow::Result<Config> {
    let config = Config::load(path).context("failed to load config")?;
    let warnings = collect_warnings(&config, with_schedule);
    let mut errors = Vec::new();
    for w in warnings {
        match w.level {
            WarnLevel::Warning => warn!("config: {}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!(
            "invalid config {}: {}",
            config.path.display(),
            errors.join("; ")
        );
    }
    Ok(config)
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start tokio runtime")
}

/// Cancel `token` on the first SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        warn!(signal, "shutdown requested, finishing the current step");
        token.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
