//! Read-only view of the relational catalog that lists every object to migrate.

mod memory;
mod sql;

pub use memory::MemoryCatalog;
pub use sql::{Dialect, SqlCatalog};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Primary,
    Dependent,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Primary => "primary",
            ObjectKind::Dependent => "dependent",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One primary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryRow {
    pub id: i64,
    /// URL or bare key of the object in the source store.
    pub locator: String,
    /// Recorded size in bytes, when the catalog knows it.
    pub size: Option<i64>,
    pub content_type: Option<String>,
}

/// A derived variant (thumbnail, webp rendition, ...) of a primary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentRow {
    pub primary_id: i64,
    pub variant: String,
    pub locator: String,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub primary: u64,
    pub dependent: u64,
}

// ---------------------------------------------------------------------------
// Catalog trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Rows with `id > after_id`, ascending by id, at most `limit`.
    async fn list_primary(&self, after_id: i64, limit: usize) -> Result<Vec<PrimaryRow>>;

    /// Every dependent row of one primary.
    async fn list_dependents(&self, primary_id: i64) -> Result<Vec<DependentRow>>;

    async fn count_all(&self) -> Result<CatalogCounts>;

    /// Primary row at position `offset` in id order.
    async fn primary_at(&self, offset: u64) -> Result<Option<PrimaryRow>>;

    /// Dependent row at position `offset` in (primary id, variant) order.
    async fn dependent_at(&self, offset: u64) -> Result<Option<DependentRow>>;
}
