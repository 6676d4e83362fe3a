//! Scheduler behaviour end to end: gating, mutual exclusion, the daemon
//! loop, shutdown and restart recovery. Workers are real `sh`/`sleep`
//! processes.
#[cfg(test)]
mod daemon {
    use crate::daemon::{evaluate, evaluation_instant, status, validate_schedule, Daemon, DaemonConfig, Decision, SkipReason};
    use crate::error::SchedulerError;
    use crate::state::{JobStatus, ScheduleState, ScheduleStateStore};
    use crate::supervisor::{Limits, WorkerCommand};
    use crate::trigger::Trigger;
    use crate::window::LowTrafficWindow;
    use chrono::{TimeZone, Utc};
    use ferry_core::config::{ScheduleConfig, WarnLevel};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn all_hours() -> LowTrafficWindow {
        let hours: Vec<u32> = (0..24).collect();
        LowTrafficWindow::new(&hours, chrono_tz::UTC).unwrap()
    }

    fn config(dir: &Path, trigger: Trigger, worker: WorkerCommand) -> DaemonConfig {
        DaemonConfig {
            trigger,
            window: all_hours(),
            low_traffic_only: true,
            limits: Limits {
                max_duration: Duration::from_secs(60),
                grace_period: Duration::from_secs(2),
            },
            state_path: dir.join("schedule-state.json"),
            pid_file: Some(dir.join("scheduler.pid")),
            worker,
        }
    }

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh", ["-c", script])
    }

    fn every(ms: u64) -> Trigger {
        Trigger::interval(Duration::from_millis(ms)).unwrap()
    }

    // ─── Gating ─────────────────────────────────────────────────────────────

    #[test]
    fn gates_in_order() {
        let window = LowTrafficWindow::new(&[2, 3, 4, 5], chrono_tz::Asia::Shanghai).unwrap();
        let max = Duration::from_secs(3 * 3600);
        let idle = ScheduleState::default();
        let running = ScheduleState {
            is_running: true,
            ..ScheduleState::default()
        };

        // 12:00 Shanghai.
        let noon = Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap();
        assert_eq!(
            evaluate(&idle, &window, true, max, noon),
            Decision::Skip(SkipReason::OutsideWindow)
        );
        assert_eq!(evaluate(&idle, &window, false, max, noon), Decision::Launch);

        // 03:00 Shanghai: three hours left, exactly enough. Any later is not.
        let three = Utc.with_ymd_and_hms(2023, 12, 31, 19, 0, 0).unwrap();
        assert_eq!(evaluate(&idle, &window, true, max, three), Decision::Launch);
        assert_eq!(
            evaluate(&idle, &window, true, max, three + chrono::Duration::seconds(2)),
            Decision::Skip(SkipReason::InsufficientWindow {
                remaining: Duration::from_secs(3 * 3600 - 2)
            })
        );
        assert_eq!(
            evaluate(&running, &window, true, max, three),
            Decision::Skip(SkipReason::AlreadyRunning)
        );

        // 04:30 Shanghai: 1h30m left.
        let late = Utc.with_ymd_and_hms(2023, 12, 31, 20, 30, 0).unwrap();
        assert_eq!(
            evaluate(&idle, &window, true, max, late),
            Decision::Skip(SkipReason::InsufficientWindow {
                remaining: Duration::from_secs(90 * 60)
            })
        );
    }

    #[test]
    fn prompt_ticks_are_judged_at_the_due_time() {
        let due = Utc.with_ymd_and_hms(2023, 12, 31, 19, 0, 0).unwrap();
        let jitter = due + chrono::Duration::milliseconds(40);
        assert_eq!(evaluation_instant(Some(due), jitter), due);

        let early = due - chrono::Duration::milliseconds(3);
        assert_eq!(evaluation_instant(Some(due), early), due);

        let late = due + chrono::Duration::seconds(30);
        assert_eq!(evaluation_instant(Some(due), late), late);
        assert_eq!(evaluation_instant(None, due), due);
    }

    #[tokio::test]
    async fn second_tick_while_running_is_skipped() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let mut daemon = Daemon::new(
            config(dir.path(), every(1_000), WorkerCommand::new("sleep", ["30"])),
            shutdown.clone(),
        );

        let job = daemon.tick(Utc::now()).expect("first tick launches");
        assert!(daemon.state().is_running);
        assert!(daemon.tick(Utc::now()).is_none());
        assert_eq!(daemon.state().total_runs, 0);

        let persisted = ScheduleStateStore::new(dir.path().join("schedule-state.json")).load();
        assert!(persisted.is_running);
        assert_eq!(persisted.current_job_run.as_ref().map(|r| r.id), Some(job.id()));

        shutdown.cancel();
        let status = daemon.wait(job).await;
        assert_eq!(status, JobStatus::Failed);
        assert!(!daemon.state().is_running);
        assert!(daemon.state().current_job_run.is_none());
        assert_eq!(daemon.state().total_runs, 1);
    }

    #[tokio::test]
    async fn spawn_failure_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut daemon = Daemon::new(
            config(
                dir.path(),
                every(1_000),
                WorkerCommand::new("/nonexistent/ferry", ["transfer"]),
            ),
            CancellationToken::new(),
        );
        assert!(daemon.tick(Utc::now()).is_none());
        assert_eq!(daemon.state().failed_runs, 1);
        assert!(!daemon.state().is_running);
        assert!(daemon.state().errors[0].message.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn unwritable_state_file_does_not_block_runs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), "file").unwrap();
        let mut cfg = config(dir.path(), every(1_000), sh("exit 0"));
        cfg.state_path = dir.path().join("blocker/schedule-state.json");
        let mut daemon = Daemon::new(cfg, CancellationToken::new());

        let job = daemon.tick(Utc::now()).expect("launches without a state file");
        assert_eq!(daemon.wait(job).await, JobStatus::Succeeded);
        assert_eq!(daemon.state().successful_runs, 1);
        assert_eq!(daemon.state().total_runs, 1);
        assert!(!daemon.state().is_running);
    }

    // ─── Loop ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn loop_runs_workers_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let daemon = Daemon::new(
            config(dir.path(), every(100), sh("echo moved; exit 0")),
            shutdown.clone(),
        );
        let task = tokio::spawn(daemon.run());

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(dir.path().join("scheduler.pid").exists());
        shutdown.cancel();
        let state = task.await.unwrap().unwrap();

        assert!(state.total_runs >= 1);
        assert_eq!(state.successful_runs, state.total_runs);
        assert_eq!(state.total_runs, state.successful_runs + state.failed_runs);
        assert!(!state.is_running);
        assert_eq!(state.schedule.as_deref(), Some("every 100ms"));
        assert!(!dir.path().join("scheduler.pid").exists());

        let persisted = ScheduleStateStore::new(dir.path().join("schedule-state.json")).load();
        assert_eq!(persisted.total_runs, state.total_runs);
    }

    #[tokio::test]
    async fn failing_worker_counts_as_failed_run() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let daemon = Daemon::new(config(dir.path(), every(100), sh("exit 4")), shutdown.clone());
        let task = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        let state = task.await.unwrap().unwrap();

        assert!(state.failed_runs >= 1);
        assert_eq!(state.successful_runs, 0);
        assert!(state.errors.iter().all(|e| e.message.contains("exit code 4")));
    }

    #[tokio::test]
    async fn shutdown_stops_running_worker() {
        let dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let daemon = Daemon::new(
            config(dir.path(), every(50), WorkerCommand::new("sleep", ["30"])),
            shutdown.clone(),
        );
        let task = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();

        let state = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("daemon stops within the grace period")
            .unwrap()
            .unwrap();
        assert_eq!(state.total_runs, 1);
        assert_eq!(state.failed_runs, 1);
        assert!(state.errors[0].message.contains("stopped on shutdown"));
        assert!(!state.is_running);
    }

    #[tokio::test]
    async fn runaway_worker_is_timed_out() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(
            dir.path(),
            every(60_000),
            sh("trap '' TERM; while true; do sleep 0.1; done"),
        );
        cfg.limits = Limits {
            max_duration: Duration::from_millis(200),
            grace_period: Duration::from_millis(300),
        };
        let mut daemon = Daemon::new(cfg, CancellationToken::new());
        let job = daemon.tick(Utc::now()).unwrap();
        assert_eq!(daemon.wait(job).await, JobStatus::TimedOut);
        let outcome = daemon.state().last_outcome.clone().unwrap();
        assert_eq!(outcome.status, JobStatus::TimedOut);
        assert!(outcome.message.contains("killed after grace period"));
    }

    // ─── Restart ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stale_run_is_recovered_on_startup() {
        let dir = TempDir::new().unwrap();
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id().unwrap();
        child.wait().await.unwrap();

        let store = ScheduleStateStore::new(dir.path().join("schedule-state.json"));
        let mut stale = ScheduleState::default();
        stale.begin(Uuid::new_v4(), Some(dead_pid), Utc::now());
        store.save(&stale);

        let mut daemon = Daemon::new(
            config(dir.path(), every(1_000), sh("exit 0")),
            CancellationToken::new(),
        );
        assert!(daemon.state().is_running);
        assert!(daemon.recover(Utc::now()));
        assert!(!daemon.state().is_running);
        assert_eq!(daemon.state().failed_runs, 1);
        assert_eq!(store.load().failed_runs, 1);
    }

    #[tokio::test]
    async fn live_pid_file_blocks_second_daemon() {
        let dir = TempDir::new().unwrap();
        let mut other = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = other.id().unwrap();
        std::fs::write(dir.path().join("scheduler.pid"), format!("{pid}\n")).unwrap();

        let daemon = Daemon::new(
            config(dir.path(), every(1_000), sh("exit 0")),
            CancellationToken::new(),
        );
        let err = daemon.run().await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning(p) if p == pid));
        other.kill().await.unwrap();
    }

    // ─── Status and validation ─────────────────────────────────────────────

    #[tokio::test]
    async fn status_reports_decision_without_writing() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), every(60_000), sh("exit 0"));
        let snapshot = status(&cfg, Utc::now());
        assert!(snapshot.window_open);
        assert_eq!(snapshot.decision, "launch");
        assert_eq!(snapshot.window_remaining.as_deref(), Some("unbounded"));
        assert!(snapshot.daemon_pid.is_none());
        assert!(!dir.path().join("schedule-state.json").exists());
    }

    #[test]
    fn schedule_validation() {
        let ok = ScheduleConfig::default();
        assert!(validate_schedule(&ok).is_empty());

        let bad_tz = ScheduleConfig {
            timezone: "Nowhere/City".into(),
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule(&bad_tz)
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("timezone")));

        let bad_cron = ScheduleConfig {
            cron: "every night".into(),
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule(&bad_cron)
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("schedule.cron")));

        let too_long = ScheduleConfig {
            max_duration: "5h".into(),
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule(&too_long)
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("longest low-traffic block")));

        let noon = ScheduleConfig {
            cron: "0 12 * * *".into(),
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule(&noon)
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("does not fire inside")));
    }
}
