use super::{ObjectMeta, ObjectStore, PutResult};
use crate::error::{FerryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// In-memory store with failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    objects: RwLock<HashMap<String, StoredObject>>,
    fail_keys: RwLock<HashSet<String>>,
    fail_next_puts: AtomicU32,
    unreachable: AtomicBool,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().unwrap_or_else(|e| e.into_inner()).insert(
            key.into(),
            StoredObject {
                data: data.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every read or write of `key` fails until cleared.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.fail_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into());
    }

    pub fn clear_failures(&self) {
        self.fail_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.fail_next_puts.store(0, Ordering::SeqCst);
    }

    /// The next `n` puts fail, whatever the key.
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_next_puts.store(n, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Successful and failed put calls so far.
    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FerryError::store(&self.name, "connection refused"));
        }
        if self
            .fail_keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
        {
            return Err(FerryError::store(
                &self.name,
                format!("injected failure for {key}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FerryError::store(&self.name, "connection refused"));
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.check(key)?;
        Ok(self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| ObjectMeta {
                size: o.data.len() as u64,
                etag: None,
            }))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| FerryError::ObjectNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<PutResult> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        let injected = self
            .fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(FerryError::store(&self.name, "injected put failure"));
        }
        self.objects.write().unwrap_or_else(|e| e.into_inner()).insert(
            key.to_string(),
            StoredObject {
                data: body,
                content_type: content_type.to_string(),
            },
        );
        Ok(PutResult { etag: None })
    }
}
