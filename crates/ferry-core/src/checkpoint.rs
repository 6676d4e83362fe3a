//! Durable migration progress.
//!
//! One JSON document per deployment, written only by the transfer worker.
//! Every write goes through [`crate::io::atomic_write`], so a reader (the
//! status command, a dashboard) never sees a torn file.

use crate::catalog::ObjectKind;
use crate::error::Result;
use crate::io;
use crate::mover::{TransferOutcome, TransferStatus};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Oldest entries are dropped once the error log exceeds this.
pub const ERROR_LOG_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Checkpoint {
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    pub total_primary: u64,
    pub processed_primary: u64,
    pub succeeded_primary: u64,
    pub failed_primary: u64,
    pub skipped_primary: u64,

    pub total_dependent: u64,
    pub processed_dependent: u64,
    pub succeeded_dependent: u64,
    pub failed_dependent: u64,
    pub skipped_dependent: u64,

    /// Highest primary id whose transfer attempt completed.
    pub last_processed_id: i64,
    /// Highest primary id whose dependents were all attempted.
    pub last_dependent_parent_id: i64,
    pub current_batch: u64,
    pub bytes_moved: u64,

    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Counter view over one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassCounters {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Checkpoint {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        }
    }

    pub fn counters(&self, kind: ObjectKind) -> PassCounters {
        match kind {
            ObjectKind::Primary => PassCounters {
                total: self.total_primary,
                processed: self.processed_primary,
                succeeded: self.succeeded_primary,
                failed: self.failed_primary,
                skipped: self.skipped_primary,
            },
            ObjectKind::Dependent => PassCounters {
                total: self.total_dependent,
                processed: self.processed_dependent,
                succeeded: self.succeeded_dependent,
                failed: self.failed_dependent,
                skipped: self.skipped_dependent,
            },
        }
    }

    /// Fold one transfer outcome into the counters.
    pub fn record(&mut self, kind: ObjectKind, outcome: &TransferOutcome) {
        let (processed, succeeded, failed, skipped) = match kind {
            ObjectKind::Primary => (
                &mut self.processed_primary,
                &mut self.succeeded_primary,
                &mut self.failed_primary,
                &mut self.skipped_primary,
            ),
            ObjectKind::Dependent => (
                &mut self.processed_dependent,
                &mut self.succeeded_dependent,
                &mut self.failed_dependent,
                &mut self.skipped_dependent,
            ),
        };
        *processed += 1;
        match outcome.status {
            TransferStatus::Success => {
                *succeeded += 1;
                self.bytes_moved += outcome.bytes;
            }
            TransferStatus::Skipped => *skipped += 1,
            TransferStatus::Failed => *failed += 1,
        }
    }

    /// Cursors only move forward.
    pub fn advance_primary_cursor(&mut self, id: i64) {
        self.last_processed_id = self.last_processed_id.max(id);
    }

    pub fn advance_dependent_cursor(&mut self, primary_id: i64) {
        self.last_dependent_parent_id = self.last_dependent_parent_id.max(primary_id);
    }

    pub fn push_error(&mut self, message: impl Into<String>, context: Option<String>) {
        self.errors.push(ErrorEntry {
            timestamp: Utc::now(),
            message: message.into(),
            context,
        });
        if self.errors.len() > ERROR_LOG_CAPACITY {
            let excess = self.errors.len() - ERROR_LOG_CAPACITY;
            self.errors.drain(..excess);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file yields a default checkpoint. An unreadable one is moved
    /// aside to `<path>.corrupt` and also yields a default.
    pub fn load(&self) -> Checkpoint {
        match io::read_json::<Checkpoint>(&self.path) {
            Ok(Some(cp)) => cp,
            Ok(None) => Checkpoint::default(),
            Err(e) => {
                let aside = paths::corrupt_sibling(&self.path);
                warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "checkpoint unreadable, starting from an empty checkpoint"
                );
                if let Err(e) = std::fs::rename(&self.path, &aside) {
                    warn!(error = %e, "could not move corrupt checkpoint aside");
                }
                Checkpoint::default()
            }
        }
    }

    /// Read without side effects. `Ok(None)` when absent.
    pub fn read(&self) -> Result<Option<Checkpoint>> {
        io::read_json(&self.path)
    }

    pub fn try_save(&self, checkpoint: &Checkpoint) -> Result<()> {
        io::write_json(&self.path, checkpoint)
    }

    /// Persist, logging instead of failing. The next batch retries the write.
    pub fn save(&self, checkpoint: &Checkpoint) {
        if let Err(e) = self.try_save(checkpoint) {
            error!(path = %self.path.display(), error = %e, "failed to persist checkpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outcome(status: TransferStatus, bytes: u64) -> TransferOutcome {
        TransferOutcome {
            status,
            bytes,
            error: None,
            attempts: 1,
        }
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert_eq!(store.load(), Checkpoint::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/checkpoint.json"));
        let mut cp = Checkpoint::fresh(Utc::now());
        cp.record(ObjectKind::Primary, &outcome(TransferStatus::Success, 42));
        cp.advance_primary_cursor(7);
        store.try_save(&cp).unwrap();
        assert_eq!(store.load(), cp);
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let mut cp = Checkpoint::fresh(Utc::now());
        cp.advance_primary_cursor(5);
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["lastProcessedId"], 5);
        assert!(json.get("processedPrimary").is_some());
        assert!(json.get("bytesMoved").is_some());
        assert!(json.get("finishedAt").is_none());
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = CheckpointStore::new(&path);
        assert_eq!(store.load(), Checkpoint::default());
        assert!(!path.exists());
        assert!(dir.path().join("checkpoint.json.corrupt").exists());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, br#"{"lastProcessedId": 12, "processedPrimary": 3}"#).unwrap();
        let cp = CheckpointStore::new(&path).load();
        assert_eq!(cp.last_processed_id, 12);
        assert_eq!(cp.processed_primary, 3);
        assert!(cp.errors.is_empty());
    }

    #[test]
    fn record_keeps_counters_balanced() {
        let mut cp = Checkpoint::default();
        cp.record(ObjectKind::Primary, &outcome(TransferStatus::Success, 100));
        cp.record(ObjectKind::Primary, &outcome(TransferStatus::Skipped, 0));
        cp.record(ObjectKind::Primary, &outcome(TransferStatus::Failed, 0));
        cp.record(ObjectKind::Dependent, &outcome(TransferStatus::Success, 10));

        let p = cp.counters(ObjectKind::Primary);
        assert_eq!(p.processed, 3);
        assert_eq!(p.processed, p.succeeded + p.failed + p.skipped);
        assert_eq!(cp.counters(ObjectKind::Dependent).succeeded, 1);
        assert_eq!(cp.bytes_moved, 110);
    }

    #[test]
    fn cursors_never_decrease() {
        let mut cp = Checkpoint::default();
        cp.advance_primary_cursor(10);
        cp.advance_primary_cursor(4);
        assert_eq!(cp.last_processed_id, 10);
        cp.advance_dependent_cursor(3);
        cp.advance_dependent_cursor(1);
        assert_eq!(cp.last_dependent_parent_id, 3);
    }

    #[test]
    fn error_log_is_bounded() {
        let mut cp = Checkpoint::default();
        for i in 0..(ERROR_LOG_CAPACITY + 25) {
            cp.push_error(format!("err {i}"), None);
        }
        assert_eq!(cp.errors.len(), ERROR_LOG_CAPACITY);
        assert_eq!(cp.errors[0].message, "err 25");
        assert_eq!(
            cp.errors.last().unwrap().message,
            format!("err {}", ERROR_LOG_CAPACITY + 24)
        );
    }
}
