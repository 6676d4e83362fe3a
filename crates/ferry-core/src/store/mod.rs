//! Object storage backends.
//!
//! Both ends of a migration are an [`ObjectStore`]; the engine never knows
//! which provider sits behind either one.

mod local;
mod memory;
mod s3;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

use crate::config::StoreConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human label used in logs and errors.
    fn name(&self) -> &str;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;

    /// Metadata for `key`, `None` if absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key).await?.is_some())
    }

    /// Full object body.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Write (or overwrite) `key`.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<PutResult>;
}

/// Where a store sits in the migration; the destination may be created on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Source,
    Destination,
}

impl StoreRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreRole::Source => "source",
            StoreRole::Destination => "destination",
        }
    }
}

/// Build a store from its config section.
pub async fn open(
    config: &StoreConfig,
    role: StoreRole,
    public_read: bool,
) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StoreConfig::S3 { .. } => {
            let acl = public_read && role == StoreRole::Destination;
            let store = S3Store::from_config(role.as_str(), config, acl).await?;
            Ok(Arc::new(store))
        }
        StoreConfig::Local { root } => {
            let store = LocalStore::new(role.as_str(), root);
            if role == StoreRole::Destination {
                tokio::fs::create_dir_all(root).await?;
            }
            Ok(Arc::new(store))
        }
    }
}

/// Validate a store key: non-empty, relative, no `..` segments.
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|seg| seg == ".." || seg == ".")
        || key.contains('\0')
    {
        return Err(crate::error::FerryError::InvalidKey(key.to_string()));
    }
    Ok(())
}
