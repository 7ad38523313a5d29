//! Client-side submission tracker
//!
//! `start` and `complete` gate forward progress, so their failures are
//! returned. `abandon` is fired from teardown paths: it dispatches a single
//! bounded background call and returns at once, and nothing it does can
//! reach the caller.

use csp_common::config::TrackerConfig;
use csp_common::submission::{SubmissionRecord, SubmissionStatus};
use csp_common::{time, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{HttpSubmissionApi, SubmissionApi};

#[derive(Clone)]
pub struct SubmissionTracker {
    api: Arc<dyn SubmissionApi>,
    abandon_timeout: Duration,
}

impl SubmissionTracker {
    pub fn new(api: Arc<dyn SubmissionApi>, abandon_timeout: Duration) -> Self {
        Self {
            api,
            abandon_timeout,
        }
    }

    /// Tracker talking to the HTTP backend named in `[tracker]`
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let api = HttpSubmissionApi::new(
            &config.base_url,
            time::millis_to_duration(config.request_timeout_ms),
        )?;
        Ok(Self::new(
            Arc::new(api),
            time::millis_to_duration(config.abandon_timeout_ms),
        ))
    }

    pub fn api(&self) -> Arc<dyn SubmissionApi> {
        Arc::clone(&self.api)
    }

    /// Open a lifecycle record; the returned id must be kept for the session
    pub async fn start(
        &self,
        survey_id: &str,
        respondent_name: &str,
        respondent_email: &str,
    ) -> Result<SubmissionRecord> {
        let record = self
            .api
            .start(survey_id, respondent_name, respondent_email)
            .await?;
        info!(submission_id = %record.id, survey_id = %survey_id, "Tracking submission");
        Ok(record)
    }

    /// Mark completed; repeating the call returns the existing completed record
    pub async fn complete(
        &self,
        survey_id: &str,
        submission_id: Uuid,
        completion_time_seconds: Option<i64>,
    ) -> Result<SubmissionRecord> {
        self.api
            .finish(
                survey_id,
                submission_id,
                SubmissionStatus::Completed,
                completion_time_seconds,
            )
            .await
    }

    /// Best-effort abandon signal
    ///
    /// Never blocks and never retries. Returns the background task handle when
    /// a tokio runtime is available, for callers that want to observe it; the
    /// signal is dropped (and logged) when there is no runtime.
    pub fn abandon(
        &self,
        survey_id: &str,
        submission_id: Uuid,
        completion_time_seconds: Option<i64>,
    ) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(submission_id = %submission_id, "No runtime available, abandon signal dropped");
                return None;
            }
        };

        let api = Arc::clone(&self.api);
        let survey_id = survey_id.to_string();
        let timeout = self.abandon_timeout;

        Some(handle.spawn(async move {
            let call = api.finish(
                &survey_id,
                submission_id,
                SubmissionStatus::Abandoned,
                completion_time_seconds,
            );
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(record)) => {
                    debug!(submission_id = %submission_id, status = %record.status, "Abandon signal delivered")
                }
                Ok(Err(e)) => {
                    warn!(submission_id = %submission_id, error = %e, "Abandon signal failed (ignored)")
                }
                Err(_) => {
                    warn!(submission_id = %submission_id, timeout_ms = timeout.as_millis() as u64, "Abandon signal timed out (ignored)")
                }
            }
        }))
    }

    /// Guard that fires [`abandon`](Self::abandon) when dropped without being disarmed
    pub fn guard(&self, record: &SubmissionRecord) -> AbandonGuard {
        AbandonGuard {
            tracker: self.clone(),
            survey_id: record.survey_id.clone(),
            submission_id: record.id,
            opened: Instant::now(),
            armed: true,
        }
    }
}

/// Teardown hook for an in-progress submission
///
/// Dropping an armed guard sends the abandon signal with the elapsed time.
pub struct AbandonGuard {
    tracker: SubmissionTracker,
    survey_id: String,
    submission_id: Uuid,
    opened: Instant,
    armed: bool,
}

impl AbandonGuard {
    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn elapsed_seconds(&self) -> i64 {
        self.opened.elapsed().as_secs() as i64
    }

    /// Call once the submission completed; the drop then does nothing
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            let elapsed = self.elapsed_seconds();
            let _ = self
                .tracker
                .abandon(&self.survey_id, self.submission_id, Some(elapsed));
        }
    }
}
