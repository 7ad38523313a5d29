//! Submission API client
//!
//! [`SubmissionApi`] is the seam between the client-side tracker and the
//! backend. [`HttpSubmissionApi`] talks to a remote tracker service;
//! [`crate::db::SubmissionStore`] implements the same trait in-process.

use async_trait::async_trait;
use csp_common::submission::{
    CompleteSubmissionRequest, StartSubmissionRequest, SubmissionRecord, SubmissionStatus,
};
use csp_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const USER_AGENT: &str = concat!("csp-tracker-client/", env!("CARGO_PKG_VERSION"));

/// Backend operations the tracker needs
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    /// Open a lifecycle record; unknown survey ids are a validation error
    async fn start(
        &self,
        survey_id: &str,
        respondent_name: &str,
        respondent_email: &str,
    ) -> Result<SubmissionRecord>;

    /// Request a terminal transition (`completed` or `abandoned`)
    async fn finish(
        &self,
        survey_id: &str,
        submission_id: Uuid,
        status: SubmissionStatus,
        completion_time: Option<i64>,
    ) -> Result<SubmissionRecord>;
}

/// HTTP client for the tracker backend
#[derive(Clone)]
pub struct HttpSubmissionApi {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpSubmissionApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| Error::Validation(format!("Invalid tracker URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Validation(format!("Tracker URL cannot take a path: {}", base_url)));
        }

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Base URL with `segments` appended, each percent-encoded as one segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Validation(format!("Tracker URL cannot take a path: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!(url = %url, "POST submission API");

        let response = self
            .http_client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = extract_error_message(&error_text);
            return Err(match status.as_u16() {
                400 => Error::Validation(message),
                404 => Error::NotFound(message),
                409 => Error::Conflict { key: url.to_string() },
                code => Error::Transport(format!("HTTP {}: {}", code, message)),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid response body: {}", e)))
    }
}

#[async_trait]
impl SubmissionApi for HttpSubmissionApi {
    async fn start(
        &self,
        survey_id: &str,
        respondent_name: &str,
        respondent_email: &str,
    ) -> Result<SubmissionRecord> {
        let url = self.endpoint(&["surveys", survey_id, "submissions:start"])?;
        let body = StartSubmissionRequest {
            respondent_name: respondent_name.to_string(),
            respondent_email: respondent_email.to_string(),
        };
        self.post_json(url, &body).await
    }

    async fn finish(
        &self,
        survey_id: &str,
        submission_id: Uuid,
        status: SubmissionStatus,
        completion_time: Option<i64>,
    ) -> Result<SubmissionRecord> {
        let action = format!("{}:complete", submission_id);
        let url = self.endpoint(&["surveys", survey_id, "submissions", &action])?;
        let body = CompleteSubmissionRequest {
            completion_status: status,
            completion_time,
        };
        self.post_json(url, &body).await
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw text
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
