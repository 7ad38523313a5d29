//! Report reader/lister
//!
//! Lists every key under a prefix, then fetches and parses the objects with
//! bounded concurrency. Objects that vanished, do not parse, or lack a
//! mandatory field are logged and skipped; only a failure of the listing
//! itself fails the call. The result is assembled from independent fetches,
//! so it is a point-in-time-ish view under concurrent writes.

use csp_common::report::Report;
use csp_common::{Error, Result};
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::keys::{self, REPORTS_PREFIX, REPORT_SUFFIX};
use crate::store::ObjectStore;

/// A parsed report and the key it was read from
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReportEntry {
    pub key: String,
    pub report: Report,
}

/// Which part of the report namespace to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    All,
    Workspace(String),
    Survey {
        workspace: String,
        survey_folder: String,
    },
}

impl ListScope {
    /// Scope from optional workspace/survey filters; a survey needs a workspace
    pub fn from_filters(workspace: Option<&str>, survey_folder: Option<&str>) -> Result<Self> {
        let workspace = workspace.map(str::trim).filter(|s| !s.is_empty());
        let survey_folder = survey_folder.map(str::trim).filter(|s| !s.is_empty());
        match (workspace, survey_folder) {
            (None, None) => Ok(ListScope::All),
            (Some(ws), None) => Ok(ListScope::Workspace(ws.to_string())),
            (Some(ws), Some(folder)) => Ok(ListScope::Survey {
                workspace: ws.to_string(),
                survey_folder: folder.to_string(),
            }),
            (None, Some(_)) => Err(Error::Validation(
                "survey filter requires a workspace".to_string(),
            )),
        }
    }

    pub fn prefix(&self) -> Result<String> {
        match self {
            ListScope::All => Ok(REPORTS_PREFIX.to_string()),
            ListScope::Workspace(ws) => keys::workspace_prefix(ws),
            ListScope::Survey {
                workspace,
                survey_folder,
            } => keys::survey_prefix(workspace, survey_folder),
        }
    }
}

#[derive(Clone)]
pub struct ReportLister {
    store: Arc<dyn ObjectStore>,
    concurrency: usize,
}

impl ReportLister {
    pub fn new(store: Arc<dyn ObjectStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<Report>> {
        let entries = self
            .list_entries_by_prefix(prefix, &CancellationToken::new())
            .await?;
        Ok(into_reports(entries))
    }

    pub async fn list_all(&self) -> Result<Vec<Report>> {
        self.list_by_prefix(REPORTS_PREFIX).await
    }

    pub async fn list_by_workspace(&self, workspace: &str) -> Result<Vec<Report>> {
        self.list_by_prefix(&keys::workspace_prefix(workspace)?).await
    }

    pub async fn list_by_survey(&self, workspace: &str, survey_folder: &str) -> Result<Vec<Report>> {
        self.list_by_prefix(&keys::survey_prefix(workspace, survey_folder)?)
            .await
    }

    pub async fn list_scope(
        &self,
        scope: &ListScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReportEntry>> {
        self.list_entries_by_prefix(&scope.prefix()?, cancel).await
    }

    /// Folder names directly below `reports/{workspace}/`
    pub async fn list_survey_folders(&self, workspace: &str) -> Result<Vec<String>> {
        let prefix = keys::workspace_prefix(workspace)?;
        self.store.list_folders(&prefix).await.map_err(as_storage)
    }

    /// Fan-out fetch of every report under `prefix`
    ///
    /// Returns [`Error::Cancelled`] (and drops the outstanding fetches) if
    /// `cancel` fires before the fan-out completes.
    pub async fn list_entries_by_prefix(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReportEntry>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let keys: Vec<String> = self
            .store
            .list(prefix)
            .await
            .map_err(as_storage)?
            .into_iter()
            .filter(|key| key.ends_with(REPORT_SUFFIX))
            .collect();
        let listed = keys.len();

        let fetches = stream::iter(keys)
            .map(|key| {
                let store = Arc::clone(&self.store);
                async move { fetch_entry(store.as_ref(), key).await }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<Option<ReportEntry>>>();

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(prefix = %prefix, listed, "Listing cancelled, partial results discarded");
                return Err(Error::Cancelled);
            }
            results = fetches => results,
        };

        let entries: Vec<ReportEntry> = results.into_iter().flatten().collect();
        let skipped = listed - entries.len();
        if skipped > 0 {
            warn!(prefix = %prefix, listed, skipped, "Listing skipped unreadable reports");
        } else {
            debug!(prefix = %prefix, listed, "Listing complete");
        }

        Ok(entries)
    }
}

async fn fetch_entry(store: &dyn ObjectStore, key: String) -> Option<ReportEntry> {
    debug!(key = %key, "Fetching report");

    let object = match store.get(&key).await {
        Ok(Some(object)) => object,
        Ok(None) => {
            warn!(key = %key, "Listed report disappeared before fetch, skipping");
            return None;
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Report fetch failed, skipping");
            return None;
        }
    };

    let report: Report = match serde_json::from_slice(&object.bytes) {
        Ok(report) => report,
        Err(e) => {
            warn!(key = %key, error = %e, "Report does not parse, skipping");
            return None;
        }
    };

    if let Err(e) = report.validate_mandatory() {
        warn!(key = %key, error = %e, "Report incomplete, skipping");
        return None;
    }

    Some(ReportEntry { key, report })
}

fn as_storage(e: Error) -> Error {
    match e {
        Error::Validation(_) | Error::Storage(_) | Error::Cancelled => e,
        other => Error::Storage(other.to_string()),
    }
}

pub fn into_reports(entries: Vec<ReportEntry>) -> Vec<Report> {
    entries.into_iter().map(|e| e.report).collect()
}

/// Newest first by `submittedAt`; unparsable timestamps sort last
pub fn sort_by_recency(reports: &mut [Report]) {
    reports.sort_by(compare_recency);
}

pub fn sort_entries_by_recency(entries: &mut [ReportEntry]) {
    entries.sort_by(|a, b| compare_recency(&a.report, &b.report));
}

fn compare_recency(a: &Report, b: &Report) -> Ordering {
    match (a.submitted_at_parsed(), b.submitted_at_parsed()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// TTL cache of listings keyed by prefix
///
/// A zero TTL disables caching. Writers call [`ReportCache::invalidate_key`]
/// after a successful put so the next dashboard read sees it. A load that
/// overlaps an invalidation is returned to its caller but not cached.
pub struct ReportCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Arc<Vec<ReportEntry>>)>>,
    /// Bumped under the `entries` write lock by every invalidation
    generation: AtomicU64,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached listing for `prefix`, or the result of `load` (cached on success)
    pub async fn get_or_load<F, Fut>(&self, prefix: &str, load: F) -> Result<Arc<Vec<ReportEntry>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ReportEntry>>>,
    {
        if self.is_enabled() {
            if let Some((loaded_at, entries)) = self.entries.read().await.get(prefix) {
                if loaded_at.elapsed() < self.ttl {
                    debug!(prefix = %prefix, "Listing cache hit");
                    return Ok(Arc::clone(entries));
                }
            }
        }

        let started = self.generation.load(AtomicOrdering::SeqCst);
        let entries = Arc::new(load().await?);
        if self.is_enabled() {
            let mut cached = self.entries.write().await;
            if self.generation.load(AtomicOrdering::SeqCst) == started {
                cached.insert(prefix.to_string(), (Instant::now(), Arc::clone(&entries)));
            } else {
                debug!(prefix = %prefix, "Listing invalidated while loading, not caching");
            }
        }
        Ok(entries)
    }

    /// Drop every cached listing whose prefix covers `key`
    pub async fn invalidate_key(&self, key: &str) {
        let mut cached = self.entries.write().await;
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
        cached.retain(|prefix, _| !key.starts_with(prefix.as_str()));
    }

    pub async fn clear(&self) {
        let mut cached = self.entries.write().await;
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
        cached.clear();
    }
}
