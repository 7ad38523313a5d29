//! Submission lifecycle records and the submission API wire types

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of one respondent attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Started,
    Completed,
    Abandoned,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Started => "started",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Started)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(SubmissionStatus::Started),
            "completed" => Ok(SubmissionStatus::Completed),
            "abandoned" => Ok(SubmissionStatus::Abandoned),
            other => Err(Error::Validation(format!(
                "Unknown submission status: {}",
                other
            ))),
        }
    }
}

/// Outcome of asking for a terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write the requested status
    Apply,
    /// Leave the record as it is and return it unchanged
    NoOp,
}

/// Decide whether `requested` may replace `current`
///
/// - `completed` replaces anything except `completed` (a late complete
///   corrects an abandon that raced ahead of it)
/// - `abandoned` only replaces `started`
/// - requesting `started` is a validation error
pub fn plan_transition(current: SubmissionStatus, requested: SubmissionStatus) -> Result<Transition> {
    match requested {
        SubmissionStatus::Started => Err(Error::Validation(
            "completion_status must be 'completed' or 'abandoned'".to_string(),
        )),
        SubmissionStatus::Completed => Ok(if current == SubmissionStatus::Completed {
            Transition::NoOp
        } else {
            Transition::Apply
        }),
        SubmissionStatus::Abandoned => Ok(if current == SubmissionStatus::Started {
            Transition::Apply
        } else {
            Transition::NoOp
        }),
    }
}

/// One respondent attempt at a survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub survey_id: String,
    pub workspace_id: String,
    pub respondent_name: String,
    pub respondent_email: String,
    pub status: SubmissionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time_seconds: Option<i64>,
}

/// Registered survey (authoring lives elsewhere; this is only what the tracker validates against)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// `PUT /surveys/{id}` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSurveyRequest {
    pub workspace_id: String,
    #[serde(default)]
    pub title: String,
}

/// `POST /surveys/{id}/submissions:start` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSubmissionRequest {
    pub respondent_name: String,
    #[serde(default)]
    pub respondent_email: String,
}

/// `POST /surveys/{id}/submissions/{submissionId}:complete` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteSubmissionRequest {
    pub completion_status: SubmissionStatus,
    /// Seconds the respondent spent; derived from timestamps when omitted
    #[serde(default)]
    pub completion_time: Option<i64>,
}

/// `GET /surveys/{id}/submissions` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionLog {
    pub submissions: Vec<SubmissionRecord>,
    pub total_count: i64,
    pub completed_count: i64,
    pub started_count: i64,
    pub abandoned_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_is_idempotent() {
        assert_eq!(
            plan_transition(SubmissionStatus::Started, SubmissionStatus::Completed).unwrap(),
            Transition::Apply
        );
        assert_eq!(
            plan_transition(SubmissionStatus::Completed, SubmissionStatus::Completed).unwrap(),
            Transition::NoOp
        );
    }

    #[test]
    fn test_complete_after_abandon_is_accepted() {
        assert_eq!(
            plan_transition(SubmissionStatus::Abandoned, SubmissionStatus::Completed).unwrap(),
            Transition::Apply
        );
    }

    #[test]
    fn test_abandon_only_from_started() {
        assert_eq!(
            plan_transition(SubmissionStatus::Started, SubmissionStatus::Abandoned).unwrap(),
            Transition::Apply
        );
        assert_eq!(
            plan_transition(SubmissionStatus::Completed, SubmissionStatus::Abandoned).unwrap(),
            Transition::NoOp
        );
        assert_eq!(
            plan_transition(SubmissionStatus::Abandoned, SubmissionStatus::Abandoned).unwrap(),
            Transition::NoOp
        );
    }

    #[test]
    fn test_requesting_started_is_rejected() {
        let err = plan_transition(SubmissionStatus::Started, SubmissionStatus::Started).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_status_wire_format() {
        let body: CompleteSubmissionRequest =
            serde_json::from_str(r#"{"completion_status":"abandoned","completion_time":42}"#)
                .unwrap();
        assert_eq!(body.completion_status, SubmissionStatus::Abandoned);
        assert_eq!(body.completion_time, Some(42));
        assert_eq!("completed".parse::<SubmissionStatus>().unwrap(), SubmissionStatus::Completed);
        assert!("done".parse::<SubmissionStatus>().is_err());
    }
}
