//! Persisted survey report model
//!
//! One `Report` per (workspace, survey folder, respondent name). Field names
//! are the JSON contract read by dashboard and PDF callers; they must not change.

use crate::time;
use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Top of the answer scale used by the default category scoring
pub const DEFAULT_SCALE_MAX: u32 = 5;

/// Enrichment progress for a report
///
/// Presence of `Report::enrichment` is the completion signal; this field only
/// records where the asynchronous scoring got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    /// Requested (or never issued), no result yet
    #[default]
    Pending,
    /// Analysis call in flight
    Processing,
    /// Enrichment merged
    Completed,
    /// Analysis call or merge failed
    Failed,
}

impl EnrichmentStatus {
    /// Whether moving from `self` to `next` is allowed
    ///
    /// `Completed` is sticky and nothing moves back to `Pending`.
    pub fn can_advance_to(self, next: EnrichmentStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (EnrichmentStatus::Completed, _) => false,
            (_, EnrichmentStatus::Pending) => false,
            _ => true,
        }
    }
}

/// Respondent identity captured before the first survey page
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RespondentInfo {
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default, deserialize_with = "deserialize_age")]
    pub age: Option<u32>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub education: String,
    #[serde(default)]
    pub major: String,
}

/// Per-category score in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScore {
    pub category: String,
    pub score: f64,
    pub max_score: f64,
    pub percentage: f64,
}

/// Qualitative analysis merged in after the base report is durable
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analyzed_at: String,
}

/// Canonical report object stored at `reports/{workspace}/{folder}/{name}.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default)]
    pub survey_id: String,
    pub workspace_name: String,
    #[serde(default)]
    pub survey_folder_name: String,
    pub respondent_info: RespondentInfo,
    /// Question text → integer score
    #[serde(default)]
    pub answers: BTreeMap<String, i64>,
    pub submitted_at: String,
    /// Zero means "not computed"; see [`Report::effective_score`]
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub category_scores: Vec<CategoryScore>,
    #[serde(default)]
    pub enrichment_status: EnrichmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
}

impl Report {
    /// Mean of the integer answers (sum / count), `None` without answers
    pub fn answer_mean(&self) -> Option<f64> {
        if self.answers.is_empty() {
            return None;
        }
        let sum: i64 = self.answers.values().sum();
        Some(sum as f64 / self.answers.len() as f64)
    }

    /// Score used by aggregation
    ///
    /// A zero or non-finite `overallScore` falls back to the answer mean, and
    /// to 0.0 when there are no answers either.
    pub fn effective_score(&self) -> f64 {
        if self.overall_score.is_finite() && self.overall_score != 0.0 {
            self.overall_score
        } else {
            self.answer_mean().unwrap_or(0.0)
        }
    }

    /// Parsed `submittedAt`, `None` when missing or unparsable
    pub fn submitted_at_parsed(&self) -> Option<DateTime<FixedOffset>> {
        time::parse_timestamp(&self.submitted_at)
    }

    /// Check the fields every listed report must carry
    pub fn validate_mandatory(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.respondent_info.name.trim().is_empty() {
            missing.push("respondentInfo.name");
        }
        if self.workspace_name.trim().is_empty() {
            missing.push("workspaceName");
        }
        if self.submitted_at.trim().is_empty() {
            missing.push("submittedAt");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "report is missing mandatory field(s): {}",
                missing.join(", ")
            )))
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }

    /// Overlay an enrichment and mark the report completed
    ///
    /// Answers, respondent info and `submittedAt` are left untouched.
    pub fn apply_enrichment(&mut self, enrichment: Enrichment, overall_override: Option<f64>) {
        if let Some(score) = overall_override.filter(|s| s.is_finite() && *s != 0.0) {
            self.overall_score = score;
        }
        self.enrichment = Some(enrichment);
        self.enrichment_status = EnrichmentStatus::Completed;
    }

    /// Move the enrichment status forward; returns false when the move is refused
    pub fn advance_status(&mut self, next: EnrichmentStatus) -> bool {
        if self.enrichment_status.can_advance_to(next) {
            self.enrichment_status = next;
            true
        } else {
            false
        }
    }
}

/// Category name and its maximum score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTemplate {
    pub category: String,
    pub max_score: u32,
}

impl CategoryTemplate {
    pub fn new(category: &str, max_score: u32) -> Self {
        Self {
            category: category.to_string(),
            max_score,
        }
    }
}

/// The five competency categories every survey is scored against by default
pub fn default_categories() -> Vec<CategoryTemplate> {
    vec![
        CategoryTemplate::new("AI/Data Fundamentals", 30),
        CategoryTemplate::new("Problem Solving and Application", 35),
        CategoryTemplate::new("Data Literacy and Interpretation", 30),
        CategoryTemplate::new("AI Collaboration and Communication", 30),
        CategoryTemplate::new("AI/Technology Trend Awareness", 40),
    ]
}

/// Scale an overall mean onto each category
///
/// `score = round(overall * maxScore / scaleMax)`,
/// `percentage = round(score / maxScore * 100)`.
pub fn score_categories(
    overall: f64,
    scale_max: u32,
    templates: &[CategoryTemplate],
) -> Vec<CategoryScore> {
    templates
        .iter()
        .map(|t| {
            let max = f64::from(t.max_score);
            let score = if scale_max == 0 {
                0.0
            } else {
                (overall * max / f64::from(scale_max)).round()
            };
            let percentage = if t.max_score == 0 {
                0.0
            } else {
                (score / max * 100.0).round()
            };
            CategoryScore {
                category: t.category.clone(),
                score,
                max_score: max,
                percentage,
            }
        })
        .collect()
}

/// Respondent answers collected client-side, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    #[serde(default)]
    pub survey_id: String,
    pub workspace_name: String,
    pub survey_folder_name: String,
    pub respondent_info: RespondentInfo,
    pub answers: BTreeMap<String, i64>,
}

impl ReportDraft {
    /// Build the base report: no enrichment, status pending
    pub fn into_report(self, submitted_at: DateTime<Utc>) -> Report {
        self.into_report_with(submitted_at, DEFAULT_SCALE_MAX, &default_categories())
    }

    pub fn into_report_with(
        self,
        submitted_at: DateTime<Utc>,
        scale_max: u32,
        templates: &[CategoryTemplate],
    ) -> Report {
        let mut report = Report {
            survey_id: self.survey_id,
            workspace_name: self.workspace_name.trim().to_string(),
            survey_folder_name: self.survey_folder_name.trim().to_string(),
            respondent_info: trim_respondent(self.respondent_info),
            answers: self.answers,
            submitted_at: time::to_rfc3339(&submitted_at),
            overall_score: 0.0,
            category_scores: Vec::new(),
            enrichment_status: EnrichmentStatus::Pending,
            enrichment: None,
        };
        let overall = report.answer_mean().unwrap_or(0.0);
        report.overall_score = overall;
        report.category_scores = score_categories(overall, scale_max, templates);
        report
    }
}

fn trim_respondent(info: RespondentInfo) -> RespondentInfo {
    RespondentInfo {
        name: info.name.trim().to_string(),
        organization: info.organization.trim().to_string(),
        age: info.age,
        email: info.email.trim().to_string(),
        education: info.education.trim().to_string(),
        major: info.major.trim().to_string(),
    }
}

/// Ages arrive as numbers or numeric strings depending on the writer
fn deserialize_age<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAge {
        Number(u32),
        Text(String),
    }

    Ok(match Option::<RawAge>::deserialize(deserializer)? {
        Some(RawAge::Number(n)) => Some(n),
        Some(RawAge::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
