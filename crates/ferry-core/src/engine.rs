//! Batch transfer engine.
//!
//! Walks the catalog in ascending id order, copying each primary object and
//! then each primary's dependents, and persists a [`Checkpoint`] after every
//! batch so an interrupted run resumes where it stopped.
//!
//! ```text
//!   Catalog ──list_primary──▶ batch ──▶ ObjectMover ──▶ destination
//!                               │
//!                               └──▶ Checkpoint (saved per batch)
//! ```

use crate::catalog::{Catalog, DependentRow, ObjectKind, PrimaryRow};
use crate::checkpoint::{Checkpoint, CheckpointStore, PassCounters};
use crate::config::TransferConfig;
use crate::error::{FerryError, Result};
use crate::locator;
use crate::mover::{ObjectMover, TransferOutcome, TransferStatus};
use crate::paths;
use crate::retry::RetryPolicy;
use crate::store::ObjectStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub dry_run: bool,
    pub resume: bool,
    pub primary_only: bool,
    pub dependents_only: bool,
    /// Transfers in flight within one batch. Results are still folded in id order.
    pub concurrency: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl TransferOptions {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            inter_batch_delay: Duration::from_millis(config.delay_ms),
            dry_run: false,
            resume: false,
            primary_only: false,
            dependents_only: false,
            concurrency: config.concurrency,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FerryError::InvalidOptions(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(FerryError::InvalidOptions(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.primary_only && self.dependents_only {
            return Err(FerryError::InvalidOptions(
                "--primary-only and --dependents-only are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every enabled pass reached the end of the catalog.
    Completed,
    /// Cancelled; the checkpoint holds the resume point.
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub status: RunStatus,
    pub dry_run: bool,
    pub checkpoint_path: PathBuf,
    pub batches: u64,
    pub elapsed_ms: u64,
    pub checkpoint: Checkpoint,
}

/// Published after every persisted batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub pass: ObjectKind,
    pub batch: u64,
    pub cursor: i64,
    pub counters: PassCounters,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct TransferEngine {
    catalog: Arc<dyn Catalog>,
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    checkpoint_path: PathBuf,
    retry: RetryPolicy,
    cancel: CancellationToken,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl TransferEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            source,
            destination,
            checkpoint_path: checkpoint_path.into(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checked between rows and during the inter-batch pause.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Where a run with `dry_run` set persists its checkpoint.
    pub fn checkpoint_path_for(&self, dry_run: bool) -> PathBuf {
        if dry_run {
            paths::dry_run_sibling(&self.checkpoint_path)
        } else {
            self.checkpoint_path.clone()
        }
    }

    pub async fn run(&self, opts: &TransferOptions) -> Result<RunReport> {
        opts.validate()?;
        let started = Instant::now();
        self.initialize().await?;

        let store = CheckpointStore::new(self.checkpoint_path_for(opts.dry_run));
        let now = Utc::now();
        let mut cp = if opts.resume {
            // A rehearsal resumes from the real cursor but never writes it.
            let cp = CheckpointStore::new(&self.checkpoint_path).load();
            info!(
                last_processed_id = cp.last_processed_id,
                last_dependent_parent_id = cp.last_dependent_parent_id,
                processed_primary = cp.processed_primary,
                "resuming from checkpoint"
            );
            cp
        } else {
            Checkpoint::fresh(now)
        };
        if cp.started_at.is_none() {
            cp.started_at = Some(now);
        }
        cp.finished_at = None;
        cp.current_batch = 0;

        let counts = self
            .catalog
            .count_all()
            .await
            .map_err(|e| FerryError::infrastructure("catalog", &e))?;
        cp.total_primary = counts.primary;
        cp.total_dependent = counts.dependent;
        cp.updated_at = Some(Utc::now());
        store.save(&cp);

        info!(
            dry_run = opts.dry_run,
            batch_size = opts.batch_size,
            concurrency = opts.concurrency,
            total_primary = counts.primary,
            total_dependent = counts.dependent,
            checkpoint = %store.path().display(),
            "transfer started"
        );

        let mover = ObjectMover::new(self.source.clone(), self.destination.clone())
            .with_retry(self.retry)
            .with_dry_run(opts.dry_run);

        let mut status = RunStatus::Completed;
        if !opts.dependents_only {
            status = self.primary_pass(&mover, &mut cp, &store, opts).await?;
        }
        if status == RunStatus::Completed && !opts.primary_only {
            status = self.dependent_pass(&mover, &mut cp, &store, opts).await?;
        }

        if status == RunStatus::Completed {
            cp.finished_at = Some(Utc::now());
        }
        cp.updated_at = Some(Utc::now());
        store.save(&cp);

        let elapsed = started.elapsed();
        info!(
            status = ?status,
            processed_primary = cp.processed_primary,
            succeeded_primary = cp.succeeded_primary,
            skipped_primary = cp.skipped_primary,
            failed_primary = cp.failed_primary,
            processed_dependent = cp.processed_dependent,
            failed_dependent = cp.failed_dependent,
            bytes_moved = cp.bytes_moved,
            elapsed_s = elapsed.as_secs(),
            "transfer finished"
        );

        Ok(RunReport {
            status,
            dry_run: opts.dry_run,
            checkpoint_path: store.path().to_path_buf(),
            batches: cp.current_batch,
            elapsed_ms: elapsed.as_millis() as u64,
            checkpoint: cp,
        })
    }

    /// All three endpoints must answer before any work starts.
    async fn initialize(&self) -> Result<()> {
        self.catalog
            .ping()
            .await
            .map_err(|e| FerryError::infrastructure("catalog", &e))?;
        self.source
            .ping()
            .await
            .map_err(|e| FerryError::infrastructure("source store", &e))?;
        self.destination
            .ping()
            .await
            .map_err(|e| FerryError::infrastructure("destination store", &e))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Primary pass
    // -----------------------------------------------------------------------

    async fn primary_pass(
        &self,
        mover: &ObjectMover,
        cp: &mut Checkpoint,
        store: &CheckpointStore,
        opts: &TransferOptions,
    ) -> Result<RunStatus> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Interrupted);
            }
            let rows = match self
                .catalog
                .list_primary(cp.last_processed_id, opts.batch_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    store.save(cp);
                    return Err(e);
                }
            };
            if rows.is_empty() {
                break;
            }

            let interrupted = self
                .primary_batch(mover, &rows, cp, opts.concurrency)
                .await;
            self.finish_batch(ObjectKind::Primary, cp, store);
            if interrupted {
                return Ok(RunStatus::Interrupted);
            }
            if self.pause(opts.inter_batch_delay).await {
                return Ok(RunStatus::Interrupted);
            }
        }
        Ok(RunStatus::Completed)
    }

    /// Returns true when cancellation stopped the batch early.
    async fn primary_batch(
        &self,
        mover: &ObjectMover,
        rows: &[PrimaryRow],
        cp: &mut Checkpoint,
        concurrency: usize,
    ) -> bool {
        let cancel = &self.cancel;
        let mut outcomes = stream::iter(rows)
            .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
            .map(move |row| async move {
                let outcome =
                    transfer_located(mover, &row.locator, row.content_type.as_deref()).await;
                (row, outcome)
            })
            .buffered(concurrency.max(1));

        let mut folded = 0;
        while let Some((row, outcome)) = outcomes.next().await {
            fold(cp, ObjectKind::Primary, &row.id.to_string(), &row.locator, &outcome);
            cp.advance_primary_cursor(row.id);
            folded += 1;
        }
        folded < rows.len()
    }

    // -----------------------------------------------------------------------
    // Dependent pass
    // -----------------------------------------------------------------------

    async fn dependent_pass(
        &self,
        mover: &ObjectMover,
        cp: &mut Checkpoint,
        store: &CheckpointStore,
        opts: &TransferOptions,
    ) -> Result<RunStatus> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunStatus::Interrupted);
            }
            let parents = match self
                .catalog
                .list_primary(cp.last_dependent_parent_id, opts.batch_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    store.save(cp);
                    return Err(e);
                }
            };
            if parents.is_empty() {
                break;
            }

            let mut interrupted = false;
            for parent in &parents {
                // A parent's dependents are attempted as a unit so the cursor
                // never points into the middle of a group.
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                let deps = match self.catalog.list_dependents(parent.id).await {
                    Ok(deps) => deps,
                    Err(e) => {
                        self.finish_batch(ObjectKind::Dependent, cp, store);
                        return Err(e);
                    }
                };
                self.dependent_group(mover, &deps, cp, opts.concurrency)
                    .await;
                cp.advance_dependent_cursor(parent.id);
            }

            self.finish_batch(ObjectKind::Dependent, cp, store);
            if interrupted {
                return Ok(RunStatus::Interrupted);
            }
            if self.pause(opts.inter_batch_delay).await {
                return Ok(RunStatus::Interrupted);
            }
        }
        Ok(RunStatus::Completed)
    }

    async fn dependent_group(
        &self,
        mover: &ObjectMover,
        deps: &[DependentRow],
        cp: &mut Checkpoint,
        concurrency: usize,
    ) {
        let mut outcomes = stream::iter(deps)
            .map(move |dep| async move {
                let outcome = transfer_located(mover, &dep.locator, None).await;
                (dep, outcome)
            })
            .buffered(concurrency.max(1));

        while let Some((dep, outcome)) = outcomes.next().await {
            let label = format!("{}/{}", dep.primary_id, dep.variant);
            fold(cp, ObjectKind::Dependent, &label, &dep.locator, &outcome);
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn finish_batch(&self, pass: ObjectKind, cp: &mut Checkpoint, store: &CheckpointStore) {
        cp.current_batch += 1;
        cp.updated_at = Some(Utc::now());
        store.save(cp);

        let counters = cp.counters(pass);
        let cursor = match pass {
            ObjectKind::Primary => cp.last_processed_id,
            ObjectKind::Dependent => cp.last_dependent_parent_id,
        };
        info!(
            pass = %pass,
            batch = cp.current_batch,
            cursor,
            processed = counters.processed,
            succeeded = counters.succeeded,
            skipped = counters.skipped,
            failed = counters.failed,
            "batch complete"
        );
        if let Some(tx) = &self.progress {
            let _ = tx.send(BatchProgress {
                pass,
                batch: cp.current_batch,
                cursor,
                counters,
            });
        }
    }

    /// Sleep between batches. Returns true if cancelled while waiting.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}

async fn transfer_located(
    mover: &ObjectMover,
    locator: &str,
    content_type: Option<&str>,
) -> TransferOutcome {
    match locator::object_key(locator) {
        Ok(key) => mover.transfer(&key, &key, content_type).await,
        Err(e) => {
            warn!(locator, error = %e, "cannot resolve object key");
            TransferOutcome::failed(e.to_string(), 0)
        }
    }
}

fn fold(cp: &mut Checkpoint, kind: ObjectKind, id: &str, locator: &str, outcome: &TransferOutcome) {
    cp.record(kind, outcome);
    if outcome.status == TransferStatus::Failed {
        let message = outcome
            .error
            .clone()
            .unwrap_or_else(|| "transfer failed".to_string());
        cp.push_error(message, Some(format!("{kind} {id} ({locator})")));
    }
}
