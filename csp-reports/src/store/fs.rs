//! Directory-backed object store
//!
//! Object bytes live at `<root>/<key>`, sidecar metadata at
//! `<root>/.meta/<key>.json`. Writes go to a temp file in the target directory
//! and are renamed into place. An in-process read/write lock keeps the object
//! and its sidecar consistent: puts hold it exclusively across the
//! precondition check and both writes, gets hold it shared across both reads.
//! Other processes writing the same directory are not coordinated.

use async_trait::async_trait;
use csp_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

use super::{check_precondition, compute_etag, ObjectStore, ObjectVersion, PutOptions, StoredObject};
use crate::keys::{validate_key, validate_prefix};

const META_DIR: &str = ".meta";
const TEMP_MARKER: &str = ".tmp-";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    etag: String,
    generation: u64,
    content_type: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

pub struct FsObjectStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FsObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| storage_err("create store root", &root.display().to_string(), e))?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        let mut path = key
            .split('/')
            .fold(self.root.join(META_DIR), |p, seg| p.join(seg))
            .into_os_string();
        path.push(".json");
        PathBuf::from(path)
    }

    async fn read_sidecar(&self, key: &str) -> Option<Sidecar> {
        let path = self.sidecar_path(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable object metadata");
                None
            }
        }
    }

    /// Current ETag and generation; objects without a sidecar count as generation 0
    async fn current_version(&self, key: &str) -> Result<Option<(String, u64)>> {
        let bytes = match tokio::fs::read(self.object_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("read", key, e)),
        };
        Ok(Some(match self.read_sidecar(key).await {
            Some(sidecar) => (sidecar.etag, sidecar.generation),
            None => (compute_etag(&bytes, 0), 0),
        }))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, options: PutOptions) -> Result<ObjectVersion> {
        validate_key(key)?;
        if key == META_DIR || key.starts_with(&format!("{}/", META_DIR)) {
            return Err(Error::Validation(format!("key is reserved: {}", key)));
        }

        let _guard = self.lock.write().await;

        let current = self.current_version(key).await?;
        check_precondition(
            key,
            current.as_ref().map(|(etag, _)| etag.as_str()),
            options.precondition.as_ref(),
        )?;

        let generation = current.map(|(_, g)| g + 1).unwrap_or(1);
        let etag = compute_etag(&bytes, generation);
        let sidecar = Sidecar {
            etag: etag.clone(),
            generation,
            content_type: options.content_type,
            metadata: options.metadata,
        };
        let sidecar_bytes = serde_json::to_vec(&sidecar)?;

        write_atomic(&self.object_path(key), &bytes)
            .await
            .map_err(|e| storage_err("write", key, e))?;
        write_atomic(&self.sidecar_path(key), &sidecar_bytes)
            .await
            .map_err(|e| storage_err("write metadata for", key, e))?;

        Ok(ObjectVersion { etag, generation })
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        validate_key(key)?;

        let _guard = self.lock.read().await;

        let bytes = match tokio::fs::read(self.object_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("read", key, e)),
        };

        let object = match self.read_sidecar(key).await {
            Some(sidecar) => StoredObject {
                bytes,
                etag: sidecar.etag,
                content_type: sidecar.content_type,
                metadata: sidecar.metadata,
            },
            None => StoredObject {
                etag: compute_etag(&bytes, 0),
                bytes,
                content_type: super::JSON_CONTENT_TYPE.to_string(),
                metadata: BTreeMap::new(),
            },
        };
        Ok(Some(object))
    }

    async fn ping(&self) -> Result<()> {
        let root = self.root.display().to_string();
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| storage_err("stat store root", &root, e))?;
        if !metadata.is_dir() {
            return Err(Error::Storage(format!("store root is not a directory: {}", root)));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;

        let mut keys = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(self.root.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(storage_err("list", &dir.display().to_string(), e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| storage_err("list", &dir.display().to_string(), e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if key_prefix.is_empty() && name == META_DIR {
                    continue;
                }
                if name.starts_with('.') && name.contains(TEMP_MARKER) {
                    continue;
                }

                let key = format!("{}{}", key_prefix, name);
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| storage_err("stat", &key, e))?;

                if file_type.is_dir() {
                    let child_prefix = format!("{}/", key);
                    // Only descend where the prefix can still match
                    if child_prefix.starts_with(prefix) || prefix.starts_with(&child_prefix) {
                        pending.push((entry.path(), child_prefix));
                    }
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "object path has no parent")
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}{}{}", file_name, TEMP_MARKER, uuid::Uuid::new_v4()));

    tokio::fs::write(&temp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

fn storage_err(op: &str, key: &str, e: std::io::Error) -> Error {
    Error::Storage(format!("Failed to {} {}: {}", op, key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_with_metadata() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::open(temp.path()).await.unwrap();

        let metadata = BTreeMap::from([("survey-id".to_string(), "s-1".to_string())]);
        let version = store
            .put(
                "reports/ws/f/김민지.json",
                b"{\"a\":1}".to_vec(),
                PutOptions::json().with_metadata(metadata.clone()),
            )
            .await
            .unwrap();

        let object = store.get("reports/ws/f/김민지.json").await.unwrap().unwrap();
        assert_eq!(object.bytes, b"{\"a\":1}");
        assert_eq!(object.etag, version.etag);
        assert_eq!(object.metadata, metadata);
        assert!(temp.path().join("reports/ws/f/김민지.json").exists());
    }

    #[tokio::test]
    async fn test_list_skips_metadata_dir() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::open(temp.path()).await.unwrap();
        for key in ["reports/a/x/1.json", "reports/a/y/2.json", "reports/b/x/3.json"] {
            store.put(key, b"{}".to_vec(), PutOptions::json()).await.unwrap();
        }

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|k| !k.starts_with(".meta")));

        assert_eq!(
            store.list("reports/a/").await.unwrap(),
            vec!["reports/a/x/1.json", "reports/a/y/2.json"]
        );
        assert_eq!(store.list_folders("reports/").await.unwrap(), vec!["a", "b"]);
        assert!(store.list("reports/zzz/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conditional_put_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let first = {
            let store = FsObjectStore::open(temp.path()).await.unwrap();
            store.put("k/a", b"1".to_vec(), PutOptions::json()).await.unwrap()
        };

        let store = FsObjectStore::open(temp.path()).await.unwrap();
        let second = store
            .put("k/a", b"2".to_vec(), PutOptions::json().if_match(first.etag.clone()))
            .await
            .unwrap();
        assert_eq!(second.generation, 2);

        let err = store
            .put("k/a", b"3".to_vec(), PutOptions::json().if_match(first.etag))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_object_without_sidecar_is_readable() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::open(temp.path()).await.unwrap();
        std::fs::create_dir_all(temp.path().join("reports/ws/f")).unwrap();
        std::fs::write(temp.path().join("reports/ws/f/kim.json"), b"{}").unwrap();

        let object = store.get("reports/ws/f/kim.json").await.unwrap().unwrap();
        assert!(object.etag.ends_with("-0"));

        let version = store
            .put("reports/ws/f/kim.json", b"[]".to_vec(), PutOptions::json().if_match(object.etag))
            .await
            .unwrap();
        assert_eq!(version.generation, 1);
    }

    #[tokio::test]
    async fn test_ping_checks_root_only() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("store");
        let store = FsObjectStore::open(&root).await.unwrap();
        store.put("reports/ws/f/kim.json", b"{}".to_vec(), PutOptions::json()).await.unwrap();
        store.ping().await.unwrap();

        std::fs::remove_dir_all(&root).unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        std::fs::write(&root, b"not a dir").unwrap();
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_reserved_key_rejected() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::open(temp.path()).await.unwrap();
        let err = store.put(".meta/x", b"".to_vec(), PutOptions::json()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
