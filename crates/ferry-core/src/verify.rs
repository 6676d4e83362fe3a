//! Sampling audit of the destination.
//!
//! Draws positions uniformly without replacement from a seeded RNG, so a run
//! can be replayed exactly with `--seed`.

use crate::catalog::{Catalog, ObjectKind};
use crate::error::{FerryError, Result};
use crate::locator;
use crate::store::ObjectStore;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Ok,
    Missing,
    SizeMismatch,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleCheck {
    pub kind: ObjectKind,
    /// Primary id, or `<primary id>/<variant>` for dependents.
    pub id: String,
    pub key: Option<String>,
    pub status: SampleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub seed: u64,
    pub sample_size: usize,
    pub total_checked: usize,
    pub successful: usize,
    pub missing: usize,
    pub size_mismatch: usize,
    pub errors: Vec<String>,
    pub samples: Vec<SampleCheck>,
}

impl VerificationResult {
    fn new(seed: u64, sample_size: usize) -> Self {
        Self {
            seed,
            sample_size,
            total_checked: 0,
            successful: 0,
            missing: 0,
            size_mismatch: 0,
            errors: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.size_mismatch == 0 && self.errors.is_empty()
    }

    fn push(&mut self, check: SampleCheck) {
        self.total_checked += 1;
        match check.status {
            SampleStatus::Ok => self.successful += 1,
            SampleStatus::Missing => self.missing += 1,
            SampleStatus::SizeMismatch => self.size_mismatch += 1,
            SampleStatus::Error => {
                let message = check.error.clone().unwrap_or_default();
                self.errors
                    .push(format!("{} {}: {message}", check.kind, check.id));
            }
        }
        self.samples.push(check);
    }
}

pub struct Verifier {
    catalog: Arc<dyn Catalog>,
    destination: Arc<dyn ObjectStore>,
}

impl Verifier {
    pub fn new(catalog: Arc<dyn Catalog>, destination: Arc<dyn ObjectStore>) -> Self {
        Self {
            catalog,
            destination,
        }
    }

    /// Check up to `sample_size` primary rows and up to `sample_size` dependent rows.
    pub async fn verify(&self, sample_size: usize, seed: Option<u64>) -> Result<VerificationResult> {
        let seed = seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let counts = self
            .catalog
            .count_all()
            .await
            .map_err(|e| FerryError::infrastructure("catalog", &e))?;
        let primary_offsets = sample_offsets(&mut rng, counts.primary, sample_size);
        let dependent_offsets = sample_offsets(&mut rng, counts.dependent, sample_size);
        info!(
            seed,
            primary = primary_offsets.len(),
            dependent = dependent_offsets.len(),
            "verifying sample"
        );

        let mut result = VerificationResult::new(seed, sample_size);

        for offset in primary_offsets {
            match self.catalog.primary_at(offset).await {
                Ok(Some(row)) => {
                    let expected = row.size.filter(|s| *s > 0).map(|s| s as u64);
                    let check = self
                        .check(ObjectKind::Primary, row.id.to_string(), &row.locator, expected)
                        .await;
                    result.push(check);
                }
                // The catalog shrank since it was counted.
                Ok(None) => {}
                Err(e) => result.push(catalog_error(ObjectKind::Primary, offset, &e)),
            }
        }

        for offset in dependent_offsets {
            match self.catalog.dependent_at(offset).await {
                Ok(Some(row)) => {
                    let id = format!("{}/{}", row.primary_id, row.variant);
                    // Variant sizes are not reliable in the catalog; existence only.
                    let check = self
                        .check(ObjectKind::Dependent, id, &row.locator, None)
                        .await;
                    result.push(check);
                }
                Ok(None) => {}
                Err(e) => result.push(catalog_error(ObjectKind::Dependent, offset, &e)),
            }
        }

        info!(
            checked = result.total_checked,
            successful = result.successful,
            missing = result.missing,
            size_mismatch = result.size_mismatch,
            errors = result.errors.len(),
            "verification finished"
        );
        Ok(result)
    }

    async fn check(
        &self,
        kind: ObjectKind,
        id: String,
        locator: &str,
        expected_size: Option<u64>,
    ) -> SampleCheck {
        let mut check = SampleCheck {
            kind,
            id,
            key: None,
            status: SampleStatus::Error,
            expected_size,
            actual_size: None,
            error: None,
        };
        let key = match locator::object_key(locator) {
            Ok(key) => key,
            Err(e) => {
                check.error = Some(e.to_string());
                return check;
            }
        };
        match self.destination.head(&key).await {
            Ok(None) => {
                warn!(kind = %kind, id = %check.id, key = %key, "missing at destination");
                check.status = SampleStatus::Missing;
            }
            Ok(Some(meta)) => {
                check.actual_size = Some(meta.size);
                check.status = match expected_size {
                    Some(expected) if expected != meta.size => {
                        warn!(
                            kind = %kind,
                            id = %check.id,
                            key = %key,
                            expected,
                            actual = meta.size,
                            "size mismatch"
                        );
                        SampleStatus::SizeMismatch
                    }
                    _ => SampleStatus::Ok,
                };
            }
            Err(e) => check.error = Some(e.to_string()),
        }
        check.key = Some(key);
        check
    }
}

fn catalog_error(kind: ObjectKind, offset: u64, e: &FerryError) -> SampleCheck {
    SampleCheck {
        kind,
        id: format!("@{offset}"),
        key: None,
        status: SampleStatus::Error,
        expected_size: None,
        actual_size: None,
        error: Some(e.to_string()),
    }
}

/// Up to `amount` distinct positions in `0..total`, ascending.
fn sample_offsets(rng: &mut StdRng, total: u64, amount: usize) -> Vec<u64> {
    let total = total as usize;
    let amount = amount.min(total);
    if amount == 0 {
        return Vec::new();
    }
    let mut offsets: Vec<u64> = index::sample(rng, total, amount)
        .into_iter()
        .map(|i| i as u64)
        .collect();
    offsets.sort_unstable();
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DependentRow, MemoryCatalog, PrimaryRow};
    use crate::store::MemoryStore;

    fn fixture(n: i64) -> (Arc<MemoryCatalog>, Arc<MemoryStore>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let destination = Arc::new(MemoryStore::new("destination"));
        for id in 1..=n {
            catalog.insert_primary(PrimaryRow {
                id,
                locator: format!("img/{id}.jpg"),
                size: Some(4),
                content_type: None,
            });
            catalog.insert_dependent(DependentRow {
                primary_id: id,
                variant: "thumb".to_string(),
                locator: format!("img/{id}_thumb.jpg"),
                size: Some(999),
            });
            destination.insert(format!("img/{id}.jpg"), vec![0u8; 4]);
            destination.insert(format!("img/{id}_thumb.jpg"), vec![0u8; 2]);
        }
        (catalog, destination)
    }

    #[tokio::test]
    async fn clean_destination_verifies_clean() {
        let (catalog, destination) = fixture(20);
        let result = Verifier::new(catalog, destination)
            .verify(5, Some(7))
            .await
            .unwrap();
        assert_eq!(result.total_checked, 10);
        assert_eq!(result.successful, 10);
        assert!(result.is_clean());
    }

    #[tokio::test]
    async fn classifies_missing_and_mismatched_objects() {
        let (catalog, destination) = fixture(3);
        destination.insert("img/2.jpg", vec![0u8; 9]);
        catalog.insert_primary(PrimaryRow {
            id: 4,
            locator: "img/4.jpg".to_string(),
            size: Some(4),
            content_type: None,
        });

        let result = Verifier::new(catalog, destination)
            .verify(100, Some(1))
            .await
            .unwrap();
        assert_eq!(result.total_checked, 7);
        assert_eq!(result.missing, 1);
        assert_eq!(result.size_mismatch, 1);
        assert_eq!(result.successful, 5);
        assert!(!result.is_clean());
        let mismatch = result
            .samples
            .iter()
            .find(|s| s.status == SampleStatus::SizeMismatch)
            .unwrap();
        assert_eq!(mismatch.id, "2");
        assert_eq!((mismatch.expected_size, mismatch.actual_size), (Some(4), Some(9)));
    }

    #[tokio::test]
    async fn same_seed_same_sample() {
        let (catalog, destination) = fixture(50);
        let verifier = Verifier::new(catalog, destination);
        let a = verifier.verify(8, Some(42)).await.unwrap();
        let b = verifier.verify(8, Some(42)).await.unwrap();
        let ids = |r: &VerificationResult| r.samples.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.seed, 42);
        assert_eq!(a.total_checked, 16);
    }

    #[tokio::test]
    async fn destination_errors_are_reported() {
        let (catalog, destination) = fixture(1);
        destination.fail_key("img/1.jpg");
        let result = Verifier::new(catalog, destination)
            .verify(10, Some(3))
            .await
            .unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("primary 1"));
    }

    #[tokio::test]
    async fn unreachable_catalog_is_fatal() {
        let (catalog, destination) = fixture(1);
        catalog.set_unreachable(true);
        assert!(Verifier::new(catalog, destination)
            .verify(10, None)
            .await
            .is_err());
    }

    #[test]
    fn offsets_are_distinct_and_bounded() {
        let mut rng = StdRng::seed_from_u64(9);
        let offsets = sample_offsets(&mut rng, 10, 25);
        assert_eq!(offsets, (0..10).collect::<Vec<u64>>());
        assert!(sample_offsets(&mut rng, 0, 5).is_empty());
    }
}
