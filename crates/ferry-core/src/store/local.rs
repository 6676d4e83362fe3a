use super::{check_key, ObjectMeta, ObjectStore, PutResult};
use crate::error::{FerryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Filesystem store: key `a/b.jpg` lives at `<root>/a/b.jpg`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    name: String,
    root: PathBuf,
}

impl LocalStore {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        match tokio::fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(FerryError::store(
                &self.name,
                format!("{} is not a directory", self.root.display()),
            )),
            Err(e) => Err(FerryError::store(
                &self.name,
                format!("{}: {e}", self.root.display()),
            )),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(Some(ObjectMeta {
                size: m.len(),
                etag: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FerryError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<PutResult> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || crate::io::atomic_write(&path, &body))
            .await
            .map_err(|e| FerryError::store("local", format!("write task failed: {e}")))??;
        Ok(PutResult { etag: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_head_and_get() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new("destination", dir.path());
        store.ping().await.unwrap();

        assert!(!store.exists("a/b.jpg").await.unwrap());
        store
            .put("a/b.jpg", Bytes::from_static(b"12345"), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(store.head("a/b.jpg").await.unwrap().unwrap().size, 5);
        assert_eq!(&store.get("a/b.jpg").await.unwrap()[..], b"12345");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new("source", dir.path());
        let err = store.get("nope.jpg").await.unwrap_err();
        assert!(matches!(err, FerryError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn ping_fails_for_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new("source", dir.path().join("missing"));
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new("destination", dir.path());
        assert!(store
            .put("../escape.jpg", Bytes::from_static(b"x"), "image/jpeg")
            .await
            .is_err());
    }
}
