//! Report writer
//!
//! The base report is written once the respondent finishes; the enrichment is
//! merged later by re-writing the same key. Every later write is a full-object
//! read-modify-write made conditional on the ETag that was read, so a
//! concurrent re-submission is detected as a conflict instead of being lost.

use csp_common::report::{Enrichment, EnrichmentStatus, Report};
use csp_common::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::keys::report_key;
use crate::store::{ObjectStore, PutOptions};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of a successful write
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WriteResult {
    pub key: String,
    pub etag: String,
    pub generation: u64,
}

#[derive(Clone)]
pub struct ReportWriter {
    store: Arc<dyn ObjectStore>,
    merge_max_attempts: u32,
    retry_backoff: Duration,
}

impl ReportWriter {
    pub fn new(store: Arc<dyn ObjectStore>, merge_max_attempts: u32) -> Self {
        Self {
            store,
            merge_max_attempts: merge_max_attempts.max(1),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    /// Persist a base report at its deterministic key, replacing any previous object
    ///
    /// Failure here means the respondent was not durably recorded.
    pub async fn write_base_report(&self, report: &Report) -> Result<WriteResult> {
        report.validate_mandatory()?;
        let key = report_key(
            &report.workspace_name,
            &report.survey_folder_name,
            &report.respondent_info.name,
        )?;

        let bytes = serde_json::to_vec_pretty(report)?;
        let options = PutOptions::json().with_metadata(report_metadata(report));

        let version = self.store.put(&key, bytes, options).await.map_err(|e| {
            error!(key = %key, error = %e, "Base report write failed");
            match e {
                Error::Validation(_) | Error::Storage(_) => e,
                other => Error::Storage(other.to_string()),
            }
        })?;

        info!(
            key = %key,
            respondent = %report.respondent_info.name,
            etag = %version.etag,
            "Base report written"
        );

        Ok(WriteResult {
            key,
            etag: version.etag,
            generation: version.generation,
        })
    }

    /// Overlay an enrichment onto the stored report and mark it completed
    ///
    /// `NotFound` when the base report was never written; `Conflict` when
    /// every attempt lost against a concurrent writer.
    pub async fn merge_enrichment(
        &self,
        key: &str,
        enrichment: Enrichment,
        overall_override: Option<f64>,
    ) -> Result<WriteResult> {
        let result = self
            .update_report(key, "merge_enrichment", |report| {
                report.apply_enrichment(enrichment.clone(), overall_override);
                true
            })
            .await?;

        match result {
            Some(result) => {
                info!(key = %key, etag = %result.etag, "Enrichment merged");
                Ok(result)
            }
            None => Err(Error::Internal(format!("merge of {} produced no write", key))),
        }
    }

    /// Move the stored enrichment status forward
    ///
    /// Returns `Ok(None)` without writing when the move is refused
    /// (`completed` is final, nothing returns to `pending`).
    pub async fn set_enrichment_status(
        &self,
        key: &str,
        status: EnrichmentStatus,
    ) -> Result<Option<WriteResult>> {
        self.update_report(key, "set_enrichment_status", |report| {
            if report.enrichment_status == status {
                return false;
            }
            report.advance_status(status)
        })
        .await
    }

    /// Conditional read-modify-write with bounded retries
    ///
    /// `apply` returns false to skip the write.
    async fn update_report<F>(&self, key: &str, op: &str, mut apply: F) -> Result<Option<WriteResult>>
    where
        F: FnMut(&mut Report) -> bool + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let object = self
                .store
                .get(key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("report {}", key)))?;
            let mut report: Report = serde_json::from_slice(&object.bytes)?;

            if !apply(&mut report) {
                debug!(key = %key, op = op, "Report update not needed");
                return Ok(None);
            }

            let bytes = serde_json::to_vec_pretty(&report)?;
            let options = PutOptions::json()
                .with_metadata(report_metadata(&report))
                .if_match(object.etag);

            match self.store.put(key, bytes, options).await {
                Ok(version) => {
                    return Ok(Some(WriteResult {
                        key: key.to_string(),
                        etag: version.etag,
                        generation: version.generation,
                    }))
                }
                Err(e) if e.is_conflict() && attempt < self.merge_max_attempts => {
                    warn!(
                        key = %key,
                        op = op,
                        attempt,
                        max_attempts = self.merge_max_attempts,
                        "Concurrent write detected, re-reading"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Object metadata carried alongside a report
pub fn report_metadata(report: &Report) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::from([
        ("survey-id".to_string(), report.survey_id.clone()),
        ("workspace-name".to_string(), report.workspace_name.clone()),
        ("respondent-name".to_string(), report.respondent_info.name.clone()),
        ("respondent-email".to_string(), report.respondent_info.email.clone()),
        ("submitted-at".to_string(), report.submitted_at.clone()),
    ]);

    match &report.enrichment {
        Some(enrichment) => {
            metadata.insert(
                "content-type".to_string(),
                "survey-report-with-enrichment".to_string(),
            );
            metadata.insert("enriched-at".to_string(), enrichment.analyzed_at.clone());
            metadata.insert(
                "overall-score".to_string(),
                report.effective_score().to_string(),
            );
        }
        None => {
            metadata.insert("content-type".to_string(), "survey-report".to_string());
        }
    }

    metadata
}
