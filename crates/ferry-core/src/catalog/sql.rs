use super::{Catalog, CatalogCounts, DependentRow, PrimaryRow};
use crate::config::CatalogConfig;
use crate::error::{FerryError, Result};
use crate::paths;
use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::time::Duration;
use tracing::debug;

/// SQL flavour, picked from the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        match url.split("://").next() {
            Some("mysql") | Some("mariadb") => Ok(Dialect::MySql),
            Some("sqlite") => Ok(Dialect::Sqlite),
            other => Err(FerryError::InvalidConfig(format!(
                "unsupported catalog scheme '{}'",
                other.unwrap_or_default()
            ))),
        }
    }

    /// Integer columns are cast so every driver hands back a 64-bit signed value.
    fn int_type(self) -> &'static str {
        match self {
            Dialect::MySql => "SIGNED",
            Dialect::Sqlite => "INTEGER",
        }
    }

    fn quote(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{ident}`"),
            Dialect::Sqlite => format!("\"{ident}\""),
        }
    }
}

/// Catalog backed by MySQL (production) or SQLite (rehearsals) through `sqlx::Any`.
///
/// Expected columns:
/// - primary table: `id`, `url`, `fileSize`, `fileType`
/// - dependent table: `imageId`, `variant`, `url`, `size`
#[derive(Debug, Clone)]
pub struct SqlCatalog {
    pool: AnyPool,
    dialect: Dialect,
    primary_table: String,
    dependent_table: String,
}

impl SqlCatalog {
    /// Builds a lazy pool: nothing connects until the first query, so an
    /// unreachable database surfaces from [`Catalog::ping`].
    pub fn connect(config: &CatalogConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();
        paths::validate_identifier(&config.primary_table)?;
        paths::validate_identifier(&config.dependent_table)?;
        let dialect = Dialect::from_url(&config.url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(15))
            .connect_lazy(&config.url)?;
        Ok(Self {
            pool,
            dialect,
            primary_table: dialect.quote(&config.primary_table),
            dependent_table: dialect.quote(&config.dependent_table),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn primary_columns(&self) -> String {
        let int = self.dialect.int_type();
        format!(
            "CAST(id AS {int}) AS id, url, CAST(fileSize AS {int}) AS file_size, fileType AS file_type"
        )
    }

    fn dependent_columns(&self) -> String {
        let int = self.dialect.int_type();
        format!(
            "CAST(imageId AS {int}) AS primary_id, variant, url, CAST(size AS {int}) AS size"
        )
    }
}

fn primary_from_row(row: &AnyRow) -> Result<PrimaryRow> {
    Ok(PrimaryRow {
        id: row.try_get("id")?,
        locator: row.try_get::<Option<String>, _>("url")?.unwrap_or_default(),
        size: row.try_get("file_size")?,
        content_type: row.try_get("file_type")?,
    })
}

fn dependent_from_row(row: &AnyRow) -> Result<DependentRow> {
    Ok(DependentRow {
        primary_id: row.try_get("primary_id")?,
        variant: row
            .try_get::<Option<String>, _>("variant")?
            .unwrap_or_default(),
        locator: row.try_get::<Option<String>, _>("url")?.unwrap_or_default(),
        size: row.try_get("size")?,
    })
}

#[async_trait]
impl Catalog for SqlCatalog {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_primary(&self, after_id: i64, limit: usize) -> Result<Vec<PrimaryRow>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id > ? ORDER BY id LIMIT ?",
            self.primary_columns(),
            self.primary_table
        );
        debug!(after_id, limit, "listing primary rows");
        let rows = sqlx::query(&sql)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(primary_from_row).collect()
    }

    async fn list_dependents(&self, primary_id: i64) -> Result<Vec<DependentRow>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE imageId = ? ORDER BY variant",
            self.dependent_columns(),
            self.dependent_table
        );
        let rows = sqlx::query(&sql)
            .bind(primary_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(dependent_from_row).collect()
    }

    async fn count_all(&self) -> Result<CatalogCounts> {
        let mut counts = CatalogCounts::default();
        for (table, slot) in [
            (&self.primary_table, &mut counts.primary),
            (&self.dependent_table, &mut counts.dependent),
        ] {
            let sql = format!("SELECT COUNT(*) AS n FROM {table}");
            let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
            let n: i64 = row.try_get("n")?;
            *slot = n.max(0) as u64;
        }
        Ok(counts)
    }

    async fn primary_at(&self, offset: u64) -> Result<Option<PrimaryRow>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY id LIMIT 1 OFFSET ?",
            self.primary_columns(),
            self.primary_table
        );
        let row = sqlx::query(&sql)
            .bind(offset as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(primary_from_row).transpose()
    }

    async fn dependent_at(&self, offset: u64) -> Result<Option<DependentRow>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY imageId, variant LIMIT 1 OFFSET ?",
            self.dependent_columns(),
            self.dependent_table
        );
        let row = sqlx::query(&sql)
            .bind(offset as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(dependent_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded_catalog(dir: &TempDir) -> SqlCatalog {
        let db = dir.path().join("catalog.db");
        let config = CatalogConfig {
            url: format!("sqlite://{}?mode=rwc", db.display()),
            primary_table: "images".to_string(),
            dependent_table: "image_assets".to_string(),
            max_connections: 1,
        };
        let catalog = SqlCatalog::connect(&config).unwrap();
        for stmt in [
            "CREATE TABLE images (id INTEGER PRIMARY KEY, url TEXT, fileSize INTEGER, fileType TEXT)",
            "CREATE TABLE image_assets (id INTEGER PRIMARY KEY, imageId INTEGER, variant TEXT, url TEXT, width INTEGER, height INTEGER, size INTEGER)",
            "INSERT INTO images VALUES (1, 'https://b.cos.ap-shanghai.myqcloud.com/a/1.jpg', 100, 'image/jpeg')",
            "INSERT INTO images VALUES (2, 'a/2.png', NULL, NULL)",
            "INSERT INTO images VALUES (3, 'a/3.jpg', 300, 'image/jpeg')",
            "INSERT INTO image_assets (imageId, variant, url, size) VALUES (1, 'thumb', 'a/1_thumb.jpg', 10)",
            "INSERT INTO image_assets (imageId, variant, url, size) VALUES (1, 'medium', 'a/1_medium.jpg', 50)",
            "INSERT INTO image_assets (imageId, variant, url, size) VALUES (3, 'thumb', 'a/3_thumb.jpg', 12)",
        ] {
            sqlx::query(stmt).execute(&catalog.pool).await.unwrap();
        }
        catalog
    }

    #[test]
    fn dialect_from_url() {
        assert_eq!(Dialect::from_url("mysql://u:p@h/db").unwrap(), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite://x.db").unwrap(), Dialect::Sqlite);
        assert!(Dialect::from_url("postgres://h/db").is_err());
    }

    #[test]
    fn connect_rejects_bad_table_names() {
        let config = CatalogConfig {
            url: "sqlite://x.db".to_string(),
            primary_table: "images; --".to_string(),
            dependent_table: "image_assets".to_string(),
            max_connections: 1,
        };
        assert!(SqlCatalog::connect(&config).is_err());
    }

    #[tokio::test]
    async fn lists_and_counts_against_sqlite() {
        let dir = TempDir::new().unwrap();
        let catalog = seeded_catalog(&dir).await;
        catalog.ping().await.unwrap();

        let rows = catalog.list_primary(0, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].size, Some(100));
        assert_eq!(rows[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(rows[1].size, None);

        let rest = catalog.list_primary(2, 10).await.unwrap();
        assert_eq!(rest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3]);

        let deps = catalog.list_dependents(1).await.unwrap();
        assert_eq!(
            deps.iter().map(|d| d.variant.as_str()).collect::<Vec<_>>(),
            vec!["medium", "thumb"]
        );

        let counts = catalog.count_all().await.unwrap();
        assert_eq!(counts, CatalogCounts { primary: 3, dependent: 3 });

        assert_eq!(catalog.primary_at(2).await.unwrap().unwrap().id, 3);
        assert!(catalog.primary_at(3).await.unwrap().is_none());
        let dep = catalog.dependent_at(2).await.unwrap().unwrap();
        assert_eq!((dep.primary_id, dep.variant.as_str()), (3, "thumb"));
    }
}
