use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Skipped,
    Failed,
}

impl TransferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::Skipped => "skipped",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    /// Bytes written (or, in a dry run, that would have been written).
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl TransferOutcome {
    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: TransferStatus::Failed,
            bytes: 0,
            error: Some(error.into()),
            attempts,
        }
    }
}

enum Step {
    AlreadyPresent,
    Copied(u64),
}

/// Idempotent single-object copy: probe destination, fetch, write.
///
/// Errors never escape [`ObjectMover::transfer`]; they become a `Failed`
/// outcome once retries are spent.
#[derive(Clone)]
pub struct ObjectMover {
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    dry_run: bool,
}

impl ObjectMover {
    pub fn new(source: Arc<dyn ObjectStore>, destination: Arc<dyn ObjectStore>) -> Self {
        Self {
            source,
            destination,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Probe and fetch as usual, but never write.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn transfer(
        &self,
        source_key: &str,
        dest_key: &str,
        content_type: Option<&str>,
    ) -> TransferOutcome {
        let content_type = resolve_content_type(content_type, dest_key);
        let ct = content_type.as_str();
        let attempted = self
            .retry
            .run(dest_key, move |_| async move {
                self.attempt(source_key, dest_key, ct).await
            })
            .await;

        match attempted.result {
            Ok(Step::AlreadyPresent) => {
                debug!(key = dest_key, "already at destination, skipping");
                TransferOutcome {
                    status: TransferStatus::Skipped,
                    bytes: 0,
                    error: None,
                    attempts: attempted.attempts,
                }
            }
            Ok(Step::Copied(bytes)) => TransferOutcome {
                status: TransferStatus::Success,
                bytes,
                error: None,
                attempts: attempted.attempts,
            },
            Err(e) => {
                warn!(
                    key = dest_key,
                    attempts = attempted.attempts,
                    error = %e,
                    "transfer failed"
                );
                TransferOutcome::failed(e.to_string(), attempted.attempts)
            }
        }
    }

    async fn attempt(&self, source_key: &str, dest_key: &str, content_type: &str) -> Result<Step> {
        if self.destination.exists(dest_key).await? {
            return Ok(Step::AlreadyPresent);
        }
        let body = self.source.get(source_key).await?;
        let bytes = body.len() as u64;
        if self.dry_run {
            info!(key = dest_key, bytes, content_type, "dry run: would write object");
            return Ok(Step::Copied(bytes));
        }
        self.destination.put(dest_key, body, content_type).await?;
        debug!(key = dest_key, bytes, "object copied");
        Ok(Step::Copied(bytes))
    }
}

/// Catalog value when present, otherwise guessed from the key's extension.
fn resolve_content_type(recorded: Option<&str>, key: &str) -> String {
    match recorded.map(str::trim) {
        Some(ct) if !ct.is_empty() => ct.to_string(),
        _ => mime_guess::from_path(key)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use std::time::Duration;

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (
            Arc::new(MemoryStore::new("source")),
            Arc::new(MemoryStore::new("destination")),
        )
    }

    fn mover(src: &Arc<MemoryStore>, dst: &Arc<MemoryStore>) -> ObjectMover {
        ObjectMover::new(src.clone(), dst.clone())
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn copies_missing_object() {
        let (src, dst) = stores();
        src.insert("a/1.jpg", Bytes::from_static(b"hello"));
        let out = mover(&src, &dst).transfer("a/1.jpg", "a/1.jpg", None).await;
        assert_eq!(out.status, TransferStatus::Success);
        assert_eq!(out.bytes, 5);
        assert_eq!(out.attempts, 1);
        assert!(dst.contains("a/1.jpg"));
        assert_eq!(dst.content_type("a/1.jpg").as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn recorded_content_type_wins() {
        let (src, dst) = stores();
        src.insert("a/1", Bytes::from_static(b"x"));
        mover(&src, &dst)
            .transfer("a/1", "a/1", Some("image/webp"))
            .await;
        assert_eq!(dst.content_type("a/1").as_deref(), Some("image/webp"));
    }

    #[tokio::test]
    async fn skips_existing_object_without_fetching() {
        let (src, dst) = stores();
        src.insert("a/1.jpg", Bytes::from_static(b"hello"));
        dst.insert("a/1.jpg", Bytes::from_static(b"hello"));
        let out = mover(&src, &dst).transfer("a/1.jpg", "a/1.jpg", None).await;
        assert_eq!(out.status, TransferStatus::Skipped);
        assert_eq!(src.get_calls(), 0);
        assert_eq!(dst.put_calls(), 0);
    }

    #[tokio::test]
    async fn recovers_from_transient_put_failures() {
        let (src, dst) = stores();
        src.insert("a/1.jpg", Bytes::from_static(b"hello"));
        dst.fail_next_puts(2);
        let out = mover(&src, &dst).transfer("a/1.jpg", "a/1.jpg", None).await;
        assert_eq!(out.status, TransferStatus::Success);
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_failed_outcome() {
        let (src, dst) = stores();
        src.insert("a/1.jpg", Bytes::from_static(b"hello"));
        dst.fail_next_puts(10);
        let out = mover(&src, &dst).transfer("a/1.jpg", "a/1.jpg", None).await;
        assert_eq!(out.status, TransferStatus::Failed);
        assert_eq!(out.attempts, 4);
        assert!(out.error.unwrap().contains("injected put failure"));
        assert!(!dst.contains("a/1.jpg"));
    }

    #[tokio::test]
    async fn missing_source_fails_fast() {
        let (src, dst) = stores();
        let out = mover(&src, &dst).transfer("gone.jpg", "gone.jpg", None).await;
        assert_eq!(out.status, TransferStatus::Failed);
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn dry_run_reads_but_never_writes() {
        let (src, dst) = stores();
        src.insert("a/1.jpg", Bytes::from_static(b"hello"));
        let out = mover(&src, &dst)
            .with_dry_run(true)
            .transfer("a/1.jpg", "a/1.jpg", None)
            .await;
        assert_eq!(out.status, TransferStatus::Success);
        assert_eq!(out.bytes, 5);
        assert_eq!(dst.put_calls(), 0);
        assert!(dst.is_empty());
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(resolve_content_type(None, "blob"), "application/octet-stream");
        assert_eq!(resolve_content_type(Some("  "), "a.png"), "image/png");
    }
}
