//! End-of-survey submission flow
//!
//! Order matters: the report must be durable before the lifecycle record says
//! `completed`, and enrichment only starts once both are done.

use csp_common::report::ReportDraft;
use csp_common::submission::SubmissionRecord;
use csp_common::{time, Result};
use csp_tracker::SubmissionTracker;
use tracing::{info, warn};

use crate::enrichment::EnrichmentPipeline;
use crate::writer::{ReportWriter, WriteResult};

#[derive(Clone)]
pub struct SubmissionFlow {
    writer: ReportWriter,
    tracker: SubmissionTracker,
    pipeline: Option<EnrichmentPipeline>,
}

impl SubmissionFlow {
    pub fn new(
        writer: ReportWriter,
        tracker: SubmissionTracker,
        pipeline: Option<EnrichmentPipeline>,
    ) -> Self {
        Self {
            writer,
            tracker,
            pipeline,
        }
    }

    /// Persist the respondent's report, close the lifecycle record, then
    /// hand the report to enrichment in the background
    ///
    /// Errors from the write or the completion call are returned; enrichment
    /// problems never are.
    pub async fn finish(&self, record: &SubmissionRecord, mut draft: ReportDraft) -> Result<WriteResult> {
        if draft.survey_id.trim().is_empty() {
            draft.survey_id = record.survey_id.clone();
        }

        let now = time::now();
        let report = draft.into_report(now);
        let written = self.writer.write_base_report(&report).await?;

        let elapsed = (now - record.started_at).num_seconds().max(0);
        let completed = self
            .tracker
            .complete(&record.survey_id, record.id, Some(elapsed))
            .await?;

        info!(
            submission_id = %completed.id,
            key = %written.key,
            completion_time_seconds = elapsed,
            "Submission finished"
        );

        match &self.pipeline {
            Some(pipeline) => {
                pipeline.spawn(written.key.clone(), report);
            }
            None => warn!(key = %written.key, "No analysis service configured, report stays unenriched"),
        }

        Ok(written)
    }
}
