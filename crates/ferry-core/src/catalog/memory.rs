use super::{Catalog, CatalogCounts, DependentRow, PrimaryRow};
use crate::error::{FerryError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// In-memory catalog for tests and rehearsals.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    primary: RwLock<Vec<PrimaryRow>>,
    dependents: RwLock<Vec<DependentRow>>,
    unreachable: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_primary(&self, row: PrimaryRow) {
        let mut rows = self.primary.write().unwrap_or_else(|e| e.into_inner());
        rows.push(row);
        rows.sort_by_key(|r| r.id);
    }

    pub fn insert_dependent(&self, row: DependentRow) {
        let mut rows = self.dependents.write().unwrap_or_else(|e| e.into_inner());
        rows.push(row);
        rows.sort_by(|a, b| (a.primary_id, &a.variant).cmp(&(b.primary_id, &b.variant)));
    }

    /// Every call fails while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FerryError::Catalog("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn list_primary(&self, after_id: i64, limit: usize) -> Result<Vec<PrimaryRow>> {
        self.check()?;
        let rows = self.primary.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .iter()
            .filter(|r| r.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_dependents(&self, primary_id: i64) -> Result<Vec<DependentRow>> {
        self.check()?;
        let rows = self.dependents.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .iter()
            .filter(|r| r.primary_id == primary_id)
            .cloned()
            .collect())
    }

    async fn count_all(&self) -> Result<CatalogCounts> {
        self.check()?;
        let primary = self.primary.read().unwrap_or_else(|e| e.into_inner()).len() as u64;
        let dependent = self.dependents.read().unwrap_or_else(|e| e.into_inner()).len() as u64;
        Ok(CatalogCounts { primary, dependent })
    }

    async fn primary_at(&self, offset: u64) -> Result<Option<PrimaryRow>> {
        self.check()?;
        let rows = self.primary.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(offset as usize).cloned())
    }

    async fn dependent_at(&self, offset: u64) -> Result<Option<DependentRow>> {
        self.check()?;
        let rows = self.dependents.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(offset as usize).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> PrimaryRow {
        PrimaryRow {
            id,
            locator: format!("img/{id}.jpg"),
            size: Some(10),
            content_type: None,
        }
    }

    #[tokio::test]
    async fn list_primary_is_ordered_and_bounded() {
        let catalog = MemoryCatalog::new();
        for id in [5, 1, 3, 2, 4] {
            catalog.insert_primary(row(id));
        }
        let ids: Vec<i64> = catalog
            .list_primary(1, 2)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(catalog.list_primary(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_fails_every_call() {
        let catalog = MemoryCatalog::new();
        catalog.set_unreachable(true);
        assert!(catalog.ping().await.is_err());
        assert!(catalog.list_primary(0, 10).await.is_err());
    }
}
