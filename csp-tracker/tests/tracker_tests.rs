//! Client-side tracker behaviour
//!
//! - start/complete failures reach the caller
//! - abandon returns immediately, swallows failures and honours its timeout
//! - the drop guard fires abandon unless disarmed

use async_trait::async_trait;
use csp_common::submission::{SubmissionRecord, SubmissionStatus};
use csp_common::{Error, Result};
use csp_tracker::db::{self, surveys::upsert_survey};
use csp_tracker::{SubmissionApi, SubmissionStore, SubmissionTracker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

async fn store_tracker() -> (SubmissionTracker, SubmissionStore) {
    let pool = db::init_memory_database().await.unwrap();
    upsert_survey(&pool, "s-1", "ws-1", "Entry").await.unwrap();
    let store = SubmissionStore::new(pool);
    let tracker = SubmissionTracker::new(Arc::new(store.clone()), Duration::from_secs(2));
    (tracker, store)
}

/// Backend that fails every call with a transport error
struct DownApi {
    calls: AtomicUsize,
}

#[async_trait]
impl SubmissionApi for DownApi {
    async fn start(&self, _: &str, _: &str, _: &str) -> Result<SubmissionRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Transport("connection refused".to_string()))
    }

    async fn finish(
        &self,
        _: &str,
        _: Uuid,
        _: SubmissionStatus,
        _: Option<i64>,
    ) -> Result<SubmissionRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Transport("connection refused".to_string()))
    }
}

/// Backend that never answers
struct HangingApi;

#[async_trait]
impl SubmissionApi for HangingApi {
    async fn start(&self, _: &str, _: &str, _: &str) -> Result<SubmissionRecord> {
        std::future::pending().await
    }

    async fn finish(
        &self,
        _: &str,
        _: Uuid,
        _: SubmissionStatus,
        _: Option<i64>,
    ) -> Result<SubmissionRecord> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_start_and_complete_through_store() {
    let (tracker, _store) = store_tracker().await;
    let record = tracker.start("s-1", "kim", "kim@example.com").await.unwrap();
    let done = tracker.complete("s-1", record.id, Some(90)).await.unwrap();
    assert_eq!(done.status, SubmissionStatus::Completed);
    assert_eq!(done.completion_time_seconds, Some(90));
}

#[tokio::test]
async fn test_start_unknown_survey_surfaces_validation() {
    let (tracker, _store) = store_tracker().await;
    let err = tracker.start("missing", "kim", "").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_transport_failure_on_complete_surfaces() {
    let api = Arc::new(DownApi {
        calls: AtomicUsize::new(0),
    });
    let tracker = SubmissionTracker::new(api, Duration::from_millis(100));
    let err = tracker.complete("s-1", Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn test_abandon_after_complete_keeps_completed() {
    let (tracker, store) = store_tracker().await;
    let record = tracker.start("s-1", "kim", "kim@example.com").await.unwrap();
    tracker.complete("s-1", record.id, Some(60)).await.unwrap();

    let handle = tracker.abandon("s-1", record.id, Some(61)).unwrap();
    handle.await.unwrap();

    let stored = db::submissions::get_submission(store.pool(), "s-1", record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Completed);
    assert_eq!(stored.completion_time_seconds, Some(60));
}

#[tokio::test]
async fn test_abandon_marks_started_record() {
    let (tracker, store) = store_tracker().await;
    let record = tracker.start("s-1", "kim", "kim@example.com").await.unwrap();

    tracker.abandon("s-1", record.id, Some(15)).unwrap().await.unwrap();

    let stored = db::submissions::get_submission(store.pool(), "s-1", record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Abandoned);
}

#[tokio::test]
async fn test_abandon_swallows_transport_failure_without_retry() {
    let api = Arc::new(DownApi {
        calls: AtomicUsize::new(0),
    });
    let tracker = SubmissionTracker::new(api.clone(), Duration::from_millis(100));

    let handle = tracker.abandon("s-1", Uuid::new_v4(), None).unwrap();
    // Task completes normally: the failure never becomes a panic or an error
    handle.await.unwrap();
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abandon_returns_immediately_and_times_out() {
    let tracker = SubmissionTracker::new(Arc::new(HangingApi), Duration::from_millis(50));

    let started = Instant::now();
    let handle = tracker.abandon("s-1", Uuid::new_v4(), None).unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("abandon task must end at its own timeout")
        .unwrap();
}

#[test]
fn test_abandon_without_runtime_is_dropped() {
    let tracker = SubmissionTracker::new(Arc::new(HangingApi), Duration::from_millis(50));
    assert!(tracker.abandon("s-1", Uuid::new_v4(), None).is_none());
}

#[tokio::test]
async fn test_guard_abandons_on_drop() {
    let (tracker, store) = store_tracker().await;
    let record = tracker.start("s-1", "kim", "kim@example.com").await.unwrap();

    {
        let _guard = tracker.guard(&record);
    }

    // Give the detached abandon task a chance to land
    for _ in 0..50 {
        let stored = db::submissions::get_submission(store.pool(), "s-1", record.id)
            .await
            .unwrap()
            .unwrap();
        if stored.status == SubmissionStatus::Abandoned {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("guard drop did not abandon the submission");
}

#[tokio::test]
async fn test_disarmed_guard_does_nothing() {
    let api = Arc::new(DownApi {
        calls: AtomicUsize::new(0),
    });
    let tracker = SubmissionTracker::new(api.clone(), Duration::from_millis(100));
    let (real_tracker, _store) = store_tracker().await;
    let record = real_tracker.start("s-1", "kim", "").await.unwrap();

    {
        let mut guard = tracker.guard(&record);
        guard.disarm();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
}
