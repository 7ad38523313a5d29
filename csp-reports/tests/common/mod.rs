//! Shared fixtures for csp-reports integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use csp_common::report::{Report, ReportDraft, RespondentInfo};
use csp_common::{Error, Result};
use csp_reports::store::{MemoryObjectStore, ObjectStore, ObjectVersion, PutOptions, StoredObject};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn draft(workspace: &str, folder: &str, name: &str) -> ReportDraft {
    ReportDraft {
        survey_id: "s-1".to_string(),
        workspace_name: workspace.to_string(),
        survey_folder_name: folder.to_string(),
        respondent_info: RespondentInfo {
            name: name.to_string(),
            organization: "Acme".to_string(),
            age: Some(24),
            email: format!("{}@example.com", name.to_lowercase()),
            education: "BSc".to_string(),
            major: "Statistics".to_string(),
        },
        answers: BTreeMap::from([
            ("Q1".to_string(), 4),
            ("Q2".to_string(), 5),
            ("Q3".to_string(), 3),
        ]),
    }
}

/// Base report submitted on 2026-05-01 plus `hour` hours
pub fn report_at(workspace: &str, folder: &str, name: &str, hour: u32) -> Report {
    draft(workspace, folder, name).into_report(Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap())
}

/// Memory store that rejects conditional puts with a conflict
///
/// Only puts matching the filter count; each rejection uses up one of
/// `conflicts`.
pub struct ConflictingStore {
    pub inner: MemoryObjectStore,
    conflicts: AtomicUsize,
    enriched_only: bool,
    pub conditional_puts: AtomicUsize,
}

impl ConflictingStore {
    pub fn new(conflicts: usize) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            conflicts: AtomicUsize::new(conflicts),
            enriched_only: false,
            conditional_puts: AtomicUsize::new(0),
        }
    }

    /// Conflict only on writes that carry an enrichment
    pub fn enriched_only(mut self) -> Self {
        self.enriched_only = true;
        self
    }

    fn should_conflict(&self, options: &PutOptions) -> bool {
        if options.precondition.is_none() {
            return false;
        }
        if self.enriched_only
            && options.metadata.get("content-type").map(String::as_str)
                != Some("survey-report-with-enrichment")
        {
            return false;
        }
        self.conditional_puts.fetch_add(1, Ordering::SeqCst);
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for ConflictingStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, options: PutOptions) -> Result<ObjectVersion> {
        if self.should_conflict(&options) {
            return Err(Error::Conflict {
                key: key.to_string(),
            });
        }
        self.inner.put(key, bytes, options).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }
}

pub async fn read_report(store: &dyn ObjectStore, key: &str) -> Report {
    let object = store.get(key).await.unwrap().expect("report should exist");
    serde_json::from_slice(&object.bytes).unwrap()
}
