//! Enrichment pipeline and end-of-survey flow
//!
//! Tests cover:
//! - Successful analysis is merged and marks the report completed
//! - Service failures and timeouts leave the report at `failed` with no analysis
//! - A missing base report drops the enrichment without writing
//! - Merge conflicts that outlast the retries end as `failed`
//! - The flow writes, completes the lifecycle record, then enriches

mod common;

use async_trait::async_trait;
use common::{draft, read_report, report_at, ConflictingStore};
use csp_common::report::{Enrichment, EnrichmentStatus};
use csp_common::submission::{SubmissionRecord, SubmissionStatus};
use csp_common::{Error, Result};
use csp_reports::enrichment::{AnalysisRequest, AnalysisResult, EnrichmentOutcome};
use csp_reports::store::{MemoryObjectStore, ObjectStore};
use csp_reports::{AnalysisService, EnrichmentPipeline, ReportWriter, SubmissionFlow};
use csp_tracker::db::{self, submissions::get_submission, surveys::upsert_survey};
use csp_tracker::{SubmissionApi, SubmissionStore, SubmissionTracker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

enum Behaviour {
    Succeed,
    Fail,
    Hang,
}

struct MockAnalysis {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl MockAnalysis {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AnalysisService for MockAnalysis {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => Ok(AnalysisResult {
                enrichment: Enrichment {
                    strengths: vec![format!("{} answers consistently", request.respondent_info.name)],
                    summary: "Promising".to_string(),
                    ..Default::default()
                },
                overall_score: Some(4.5),
            }),
            Behaviour::Fail => Err(Error::Transport("analysis service returned 502".to_string())),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

fn pipeline(store: Arc<dyn ObjectStore>, analysis: Arc<MockAnalysis>) -> EnrichmentPipeline {
    let writer = ReportWriter::new(store, 3).with_retry_backoff(Duration::from_millis(1));
    EnrichmentPipeline::new(analysis, writer, Duration::from_millis(200))
}

#[tokio::test]
async fn test_successful_enrichment_is_merged() {
    let store = Arc::new(MemoryObjectStore::new());
    let analysis = MockAnalysis::new(Behaviour::Succeed);
    let pipeline = pipeline(store.clone(), analysis.clone());

    let report = report_at("ws", "entry", "Kim", 10);
    let written = ReportWriter::new(store.clone(), 3)
        .write_base_report(&report)
        .await
        .unwrap();

    let outcome = pipeline.run(&written.key, &report).await;
    assert_eq!(outcome, EnrichmentOutcome::Completed);
    assert_eq!(analysis.calls.load(Ordering::SeqCst), 1);

    let stored = read_report(store.as_ref(), &written.key).await;
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Completed);
    assert_eq!(stored.overall_score, 4.5);
    let enrichment = stored.enrichment.unwrap();
    assert_eq!(enrichment.summary, "Promising");
    assert!(!enrichment.analyzed_at.is_empty());
    assert_eq!(stored.answers, report.answers);
}

#[tokio::test]
async fn test_failed_analysis_marks_failed_without_fallback() {
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = pipeline(store.clone(), MockAnalysis::new(Behaviour::Fail));

    let report = report_at("ws", "entry", "Kim", 10);
    let written = ReportWriter::new(store.clone(), 3)
        .write_base_report(&report)
        .await
        .unwrap();

    assert_eq!(pipeline.run(&written.key, &report).await, EnrichmentOutcome::Failed);

    let stored = read_report(store.as_ref(), &written.key).await;
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Failed);
    assert!(stored.enrichment.is_none());
    assert_eq!(stored.overall_score, report.overall_score);
}

#[tokio::test]
async fn test_hanging_analysis_times_out() {
    let store = Arc::new(MemoryObjectStore::new());
    let pipeline = pipeline(store.clone(), MockAnalysis::new(Behaviour::Hang));

    let report = report_at("ws", "entry", "Kim", 10);
    let written = ReportWriter::new(store.clone(), 3)
        .write_base_report(&report)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), pipeline.run(&written.key, &report))
        .await
        .expect("pipeline must honour its own timeout");
    assert_eq!(outcome, EnrichmentOutcome::Failed);

    let stored = read_report(store.as_ref(), &written.key).await;
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Failed);
}

#[tokio::test]
async fn test_missing_base_report_drops_enrichment() {
    let store = Arc::new(MemoryObjectStore::new());
    let analysis = MockAnalysis::new(Behaviour::Succeed);
    let pipeline = pipeline(store.clone(), analysis.clone());

    let report = report_at("ws", "entry", "Ghost", 10);
    let outcome = pipeline.run("reports/ws/entry/Ghost.json", &report).await;

    assert_eq!(outcome, EnrichmentOutcome::Dropped);
    assert_eq!(analysis.calls.load(Ordering::SeqCst), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_conflicting_merge_ends_failed() {
    let store = Arc::new(ConflictingStore::new(usize::MAX).enriched_only());
    let pipeline = pipeline(store.clone(), MockAnalysis::new(Behaviour::Succeed));

    let report = report_at("ws", "entry", "Kim", 10);
    let written = ReportWriter::new(store.clone(), 3)
        .write_base_report(&report)
        .await
        .unwrap();

    assert_eq!(pipeline.run(&written.key, &report).await, EnrichmentOutcome::Failed);
    assert_eq!(store.conditional_puts.load(Ordering::SeqCst), 3);

    let stored = read_report(store.as_ref(), &written.key).await;
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Failed);
    assert!(stored.enrichment.is_none());
}

async fn tracker_with_survey() -> (SubmissionTracker, SubmissionStore) {
    let pool = db::init_memory_database().await.unwrap();
    upsert_survey(&pool, "s-1", "ws-1", "AI competency").await.unwrap();
    let backend = SubmissionStore::new(pool);
    let tracker = SubmissionTracker::new(Arc::new(backend.clone()), Duration::from_secs(2));
    (tracker, backend)
}

async fn wait_for_status(store: &dyn ObjectStore, key: &str, status: EnrichmentStatus) {
    for _ in 0..100 {
        if read_report(store, key).await.enrichment_status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("report {} never reached {:?}", key, status);
}

#[tokio::test]
async fn test_flow_writes_completes_and_enriches() {
    let (tracker, backend) = tracker_with_survey().await;
    let store = Arc::new(MemoryObjectStore::new());
    let writer = ReportWriter::new(store.clone(), 3);
    let flow = SubmissionFlow::new(
        writer,
        tracker.clone(),
        Some(pipeline(store.clone(), MockAnalysis::new(Behaviour::Succeed))),
    );

    let record = tracker.start("s-1", "Kim", "kim@example.com").await.unwrap();
    let mut submission = draft("ws", "entry", "Kim");
    submission.survey_id.clear();
    let written = flow.finish(&record, submission).await.unwrap();

    assert_eq!(written.key, "reports/ws/entry/Kim.json");
    let stored = read_report(store.as_ref(), &written.key).await;
    assert_eq!(stored.survey_id, "s-1");

    let completed = get_submission(backend.pool(), "s-1", record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.status, SubmissionStatus::Completed);
    assert!(completed.completion_time_seconds.is_some());

    wait_for_status(store.as_ref(), &written.key, EnrichmentStatus::Completed).await;
}

#[tokio::test]
async fn test_flow_without_analysis_leaves_report_pending() {
    let (tracker, _) = tracker_with_survey().await;
    let store = Arc::new(MemoryObjectStore::new());
    let flow = SubmissionFlow::new(ReportWriter::new(store.clone(), 3), tracker.clone(), None);

    let record = tracker.start("s-1", "Kim", "kim@example.com").await.unwrap();
    let written = flow.finish(&record, draft("ws", "entry", "Kim")).await.unwrap();

    let stored = read_report(store.as_ref(), &written.key).await;
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Pending);
}

#[tokio::test]
async fn test_flow_write_failure_leaves_submission_open() {
    let (tracker, backend) = tracker_with_survey().await;
    let store = Arc::new(MemoryObjectStore::new());
    let flow = SubmissionFlow::new(ReportWriter::new(store.clone(), 3), tracker.clone(), None);

    let record = tracker.start("s-1", "Kim", "kim@example.com").await.unwrap();
    let err = flow
        .finish(&record, draft("", "entry", "Kim"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let current = get_submission(backend.pool(), "s-1", record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status, SubmissionStatus::Started);
    assert!(store.is_empty().await);
}

/// Backend whose completion call always fails
struct CompletionDown;

#[async_trait]
impl SubmissionApi for CompletionDown {
    async fn start(&self, _: &str, _: &str, _: &str) -> Result<SubmissionRecord> {
        Err(Error::Transport("unused".to_string()))
    }

    async fn finish(
        &self,
        _: &str,
        _: Uuid,
        _: SubmissionStatus,
        _: Option<i64>,
    ) -> Result<SubmissionRecord> {
        Err(Error::Transport("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_flow_completion_failure_is_surfaced() {
    let (tracker, _) = tracker_with_survey().await;
    let record = tracker.start("s-1", "Kim", "kim@example.com").await.unwrap();

    let store = Arc::new(MemoryObjectStore::new());
    let analysis = MockAnalysis::new(Behaviour::Succeed);
    let flow = SubmissionFlow::new(
        ReportWriter::new(store.clone(), 3),
        SubmissionTracker::new(Arc::new(CompletionDown), Duration::from_secs(1)),
        Some(pipeline(store.clone(), analysis.clone())),
    );

    let err = flow.finish(&record, draft("ws", "entry", "Kim")).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // The report is durable but enrichment never started
    let stored = read_report(store.as_ref(), "reports/ws/entry/Kim.json").await;
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Pending);
    assert_eq!(analysis.calls.load(Ordering::SeqCst), 0);
}
