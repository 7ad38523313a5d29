//! Asynchronous enrichment
//!
//! After the base report is durable, the external analysis service is asked
//! for a qualitative analysis and the answer is merged into the same object.
//! Nothing here can fail the respondent's submission: every error ends as a
//! `failed` status (or a dropped enrichment when the base report is missing)
//! plus a log line. No substitute analysis is ever generated.

use async_trait::async_trait;
use csp_common::config::AnalysisConfig;
use csp_common::report::{CategoryScore, Enrichment, EnrichmentStatus, Report, RespondentInfo};
use csp_common::{time, Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::lister::ReportCache;
use crate::writer::ReportWriter;

const USER_AGENT: &str = concat!("csp-reports/", env!("CARGO_PKG_VERSION"));

/// Body sent to the analysis service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub respondent_answers: BTreeMap<String, i64>,
    pub category_scores: Vec<CategoryScore>,
    pub overall_score: f64,
    pub respondent_info: RespondentInfo,
}

impl AnalysisRequest {
    pub fn from_report(report: &Report) -> Self {
        Self {
            respondent_answers: report.answers.clone(),
            category_scores: report.category_scores.clone(),
            overall_score: report.effective_score(),
            respondent_info: report.respondent_info.clone(),
        }
    }
}

/// Normalised analysis service answer
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// `analyzed_at` is empty unless the service supplied one
    pub enrichment: Enrichment,
    /// Replaces the report's overall score when present
    pub overall_score: Option<f64>,
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult>;
}

/// Analysis service reached over HTTP
pub struct HttpAnalysisService {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalysisService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        debug!(endpoint = %self.endpoint, respondent = %request.respondent_info.name, "Requesting analysis");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "analysis service returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid analysis response: {}", e)))?;

        normalize_response(value)
    }
}

/// Accept the shapes the analysis service has been seen to answer with
///
/// - an optional `body` wrapper, either a JSON string or an object
/// - an optional `analysis` wrapper
/// - `improvement_areas` for `weaknesses`
/// - `recommendations` as a list, or as an object of `immediate_actions`,
///   `learning_resources` (lists) and `skill_development_path` (string)
/// - `summary`, `comprehensive_summary` or `detailed_analysis` (string, or an
///   object whose string values are joined)
/// - `overall_score` / `overallScore`
pub fn normalize_response(value: Value) -> Result<AnalysisResult> {
    let mut value = value;

    if let Some(body) = value.get("body").cloned() {
        value = match body {
            Value::String(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Validation(format!("analysis body is not JSON: {}", e))
            })?,
            other => other,
        };
    }
    if let Some(analysis) = value.get("analysis").filter(|a| a.is_object()).cloned() {
        let outer_score = overall_score(&value);
        value = analysis;
        if overall_score(&value).is_none() {
            if let Some(score) = outer_score {
                value["overall_score"] = Value::from(score);
            }
        }
    }

    if !value.is_object() {
        return Err(Error::Validation("analysis response is not an object".to_string()));
    }

    let enrichment = Enrichment {
        strengths: string_list(value.get("strengths")),
        weaknesses: first_non_empty(&[
            string_list(value.get("weaknesses")),
            string_list(value.get("improvement_areas")),
        ]),
        recommendations: recommendations(value.get("recommendations")),
        summary: summary(&value),
        analyzed_at: value
            .get("analyzed_at")
            .or_else(|| value.get("analyzedAt"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };

    if enrichment.strengths.is_empty()
        && enrichment.weaknesses.is_empty()
        && enrichment.recommendations.is_empty()
        && enrichment.summary.is_empty()
    {
        return Err(Error::Validation(
            "analysis response carried no analysis".to_string(),
        ));
    }

    Ok(AnalysisResult {
        enrichment,
        overall_score: overall_score(&value),
    })
}

fn overall_score(value: &Value) -> Option<f64> {
    value
        .get("overall_score")
        .or_else(|| value.get("overallScore"))
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn first_non_empty(candidates: &[Vec<String>]) -> Vec<String> {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn recommendations(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Object(map)) => {
            let mut out = string_list(map.get("immediate_actions"));
            out.extend(string_list(map.get("learning_resources")));
            if let Some(path) = map.get("skill_development_path").and_then(Value::as_str) {
                out.push(path.to_string());
            }
            out
        }
        other => string_list(other),
    }
}

fn summary(value: &Value) -> String {
    for field in ["summary", "comprehensive_summary"] {
        if let Some(text) = value.get(field).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return text.to_string();
            }
        }
    }

    match value.get("detailed_analysis") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(map)) => map
            .values()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// How one enrichment run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    Completed,
    /// Status left at `failed`
    Failed,
    /// Base report missing; nothing written
    Dropped,
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    analysis: Arc<dyn AnalysisService>,
    writer: ReportWriter,
    timeout: Duration,
    cache: Option<Arc<ReportCache>>,
}

impl EnrichmentPipeline {
    pub fn new(analysis: Arc<dyn AnalysisService>, writer: ReportWriter, timeout: Duration) -> Self {
        Self {
            analysis,
            writer,
            timeout,
            cache: None,
        }
    }

    /// Pipeline for `[analysis]`; `None` when no endpoint is configured
    pub fn from_config(config: &AnalysisConfig, writer: ReportWriter) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
            return Ok(None);
        };
        let timeout = time::millis_to_duration(config.timeout_ms);
        let service = HttpAnalysisService::new(endpoint, timeout)?;
        Ok(Some(Self::new(Arc::new(service), writer, timeout)))
    }

    /// Invalidate this cache after every merged enrichment
    pub fn with_cache(mut self, cache: Arc<ReportCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run one enrichment to completion; never returns an error
    pub async fn run(&self, key: &str, report: &Report) -> EnrichmentOutcome {
        match self
            .writer
            .set_enrichment_status(key, EnrichmentStatus::Processing)
            .await
        {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                error!(key = %key, "Enrichment requested for a report that was never written; dropping");
                return EnrichmentOutcome::Dropped;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Could not mark enrichment as processing, continuing");
            }
        }

        let request = AnalysisRequest::from_report(report);
        let result = match tokio::time::timeout(self.timeout, self.analysis.analyze(&request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Analysis failed");
                return self.mark_failed(key).await;
            }
            Err(_) => {
                warn!(key = %key, timeout_ms = self.timeout.as_millis() as u64, "Analysis timed out");
                return self.mark_failed(key).await;
            }
        };

        let mut enrichment = result.enrichment;
        if enrichment.analyzed_at.is_empty() {
            enrichment.analyzed_at = time::now_rfc3339();
        }

        match self
            .writer
            .merge_enrichment(key, enrichment, result.overall_score)
            .await
        {
            Ok(_) => {
                if let Some(cache) = &self.cache {
                    cache.invalidate_key(key).await;
                }
                info!(key = %key, "Enrichment completed");
                EnrichmentOutcome::Completed
            }
            Err(Error::NotFound(_)) => {
                error!(key = %key, "Report vanished before enrichment merge; dropping enrichment");
                EnrichmentOutcome::Dropped
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Enrichment merge failed");
                self.mark_failed(key).await
            }
        }
    }

    /// Run in a detached task
    pub fn spawn(&self, key: String, report: Report) -> JoinHandle<EnrichmentOutcome> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(&key, &report).await })
    }

    async fn mark_failed(&self, key: &str) -> EnrichmentOutcome {
        if let Err(e) = self
            .writer
            .set_enrichment_status(key, EnrichmentStatus::Failed)
            .await
        {
            warn!(key = %key, error = %e, "Could not record enrichment failure");
        }
        if let Some(cache) = &self.cache {
            cache.invalidate_key(key).await;
        }
        EnrichmentOutcome::Failed
    }
}
