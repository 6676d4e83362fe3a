use crate::catalog::{Catalog, SqlCatalog};
use crate::config::Config;
use crate::error::Result;
use crate::store::{self, ObjectStore, StoreRole};
use std::sync::Arc;

/// Catalog plus both stores, built once from a loaded [`Config`].
#[derive(Clone)]
pub struct Endpoints {
    pub catalog: Arc<dyn Catalog>,
    pub source: Arc<dyn ObjectStore>,
    pub destination: Arc<dyn ObjectStore>,
}

impl Endpoints {
    pub async fn connect(config: &Config) -> Result<Self> {
        let catalog = SqlCatalog::connect(&config.catalog)?;
        let source = store::open(&config.source, StoreRole::Source, false).await?;
        let destination = store::open(
            &config.destination,
            StoreRole::Destination,
            config.transfer.public_read,
        )
        .await?;
        Ok(Self {
            catalog: Arc::new(catalog),
            source,
            destination,
        })
    }
}
