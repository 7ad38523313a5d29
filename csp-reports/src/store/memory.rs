//! In-memory object store

use async_trait::async_trait;
use csp_common::Result;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{check_precondition, compute_etag, ObjectStore, ObjectVersion, PutOptions, StoredObject};
use crate::keys::{validate_key, validate_prefix};

#[derive(Debug, Clone)]
struct Entry {
    object: StoredObject,
    generation: u64,
}

/// Process-local store, listing in lexicographic key order
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, options: PutOptions) -> Result<ObjectVersion> {
        validate_key(key)?;

        let mut objects = self.objects.write().await;
        let current = objects.get(key);
        check_precondition(
            key,
            current.map(|e| e.object.etag.as_str()),
            options.precondition.as_ref(),
        )?;

        let generation = current.map(|e| e.generation + 1).unwrap_or(1);
        let etag = compute_etag(&bytes, generation);
        objects.insert(
            key.to_string(),
            Entry {
                object: StoredObject {
                    bytes,
                    etag: etag.clone(),
                    content_type: options.content_type,
                    metadata: options.metadata,
                },
                generation,
            },
        );

        Ok(ObjectVersion { etag, generation })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        validate_key(key)?;
        Ok(self
            .objects
            .read()
            .await
            .get(key)
            .map(|e| e.object.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
