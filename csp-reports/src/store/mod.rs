//! Object store client
//!
//! A flat key → bytes namespace with `/` as the hierarchy separator. Single-key
//! puts are atomic; nothing spans keys. Every stored object carries an ETag so
//! read-modify-write callers can make their write conditional on what they read.

use async_trait::async_trait;
use csp_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub mod fs;
pub mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Content type used for report objects
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Condition a put must satisfy against the current object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Replace only if the current ETag equals this one
    IfMatch(String),
    /// Create only if no object exists at the key
    IfNoneMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
    pub precondition: Option<Precondition>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self::json()
    }
}

impl PutOptions {
    pub fn json() -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE.to_string(),
            metadata: BTreeMap::new(),
            precondition: None,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn if_match(mut self, etag: impl Into<String>) -> Self {
        self.precondition = Some(Precondition::IfMatch(etag.into()));
        self
    }

    pub fn if_none_match(mut self) -> Self {
        self.precondition = Some(Precondition::IfNoneMatch);
        self
    }
}

/// Version assigned by a successful put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub etag: String,
    /// Per-key write counter, starting at 1
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub etag: String,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `key`, replacing any previous object
    ///
    /// A failed precondition returns [`Error::Conflict`].
    async fn put(&self, key: &str, bytes: Vec<u8>, options: PutOptions) -> Result<ObjectVersion>;

    /// Fetch an object; `Ok(None)` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// All keys beginning with `prefix`, in store order
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Cheap reachability check for health reporting
    ///
    /// Looks up a single key that reports never use, so the cost does not grow
    /// with the number of stored objects.
    async fn ping(&self) -> Result<()> {
        self.get(PING_KEY).await.map(|_| ())
    }

    /// Names of the immediate child "folders" below `prefix`
    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self.list(prefix).await?;
        Ok(folders_from_keys(prefix, &keys))
    }
}

/// Key looked up by the default [`ObjectStore::ping`]
pub const PING_KEY: &str = "health/ping";

/// ETag for an object body at a given write generation
///
/// Hex SHA-256 of the bytes plus the generation, so rewriting identical bytes
/// still yields a new ETag.
pub fn compute_etag(bytes: &[u8], generation: u64) -> String {
    format!("{:x}-{}", Sha256::digest(bytes), generation)
}

/// Evaluate a precondition against the current ETag (`None` = no object)
pub fn check_precondition(
    key: &str,
    current_etag: Option<&str>,
    precondition: Option<&Precondition>,
) -> Result<()> {
    let satisfied = match (precondition, current_etag) {
        (None, _) => true,
        (Some(Precondition::IfNoneMatch), current) => current.is_none(),
        (Some(Precondition::IfMatch(expected)), Some(current)) => expected == current,
        (Some(Precondition::IfMatch(_)), None) => false,
    };

    if satisfied {
        Ok(())
    } else {
        Err(Error::Conflict {
            key: key.to_string(),
        })
    }
}

/// Distinct first path segments below `prefix` that have further segments after them
pub fn folders_from_keys(prefix: &str, keys: &[String]) -> Vec<String> {
    let folders: BTreeSet<String> = keys
        .iter()
        .filter_map(|key| key.strip_prefix(prefix))
        .filter_map(|rest| rest.split_once('/'))
        .map(|(folder, _)| folder)
        .filter(|folder| !folder.is_empty())
        .map(str::to_string)
        .collect();
    folders.into_iter().collect()
}
