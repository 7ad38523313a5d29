//! Object key conventions
//!
//! Keys are UTF-8, `/`-separated, never start with `/`, never contain empty,
//! `.` or `..` segments, and are at most [`MAX_KEY_BYTES`] long. Reports live
//! at `reports/{workspace}/{surveyFolder}/{sanitize(respondent)}.json`.

use csp_common::{Error, Result};

/// Root of the report namespace
pub const REPORTS_PREFIX: &str = "reports/";

/// Longest key the store accepts
pub const MAX_KEY_BYTES: usize = 1024;

/// Suffix every report object carries
pub const REPORT_SUFFIX: &str = ".json";

/// Check a full object key
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("object key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(Error::Validation(format!(
            "object key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_BYTES
        )));
    }
    if key.starts_with('/') {
        return Err(Error::Validation(format!("object key must not start with '/': {}", key)));
    }
    if key.contains('\0') {
        return Err(Error::Validation("object key must not contain NUL".to_string()));
    }
    for segment in key.split('/') {
        match segment {
            "" => {
                return Err(Error::Validation(format!("object key has an empty segment: {}", key)))
            }
            "." | ".." => {
                return Err(Error::Validation(format!(
                    "object key has a relative segment: {}",
                    key
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Check a listing prefix
///
/// The empty prefix lists everything; otherwise the prefix must be a valid key
/// once a single trailing `/` is removed.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_key(prefix.strip_suffix('/').unwrap_or(prefix))
}

/// Make a respondent name safe for use as a key segment
///
/// Replaces every character that is not alphanumeric (in any script) with
/// `_`, surrounding whitespace included. Trimming is the caller's job
/// (`ReportDraft` trims respondent fields). Blank names are rejected.
pub fn sanitize(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::Validation("respondent name must not be empty".to_string()));
    }
    Ok(name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect())
}

fn check_segment(label: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", label)));
    }
    if value.contains('/') {
        return Err(Error::Validation(format!("{} must not contain '/': {}", label, value)));
    }
    if value == "." || value == ".." {
        return Err(Error::Validation(format!("{} must not be '{}'", label, value)));
    }
    Ok(())
}

/// `reports/{workspace}/`
pub fn workspace_prefix(workspace: &str) -> Result<String> {
    check_segment("workspace name", workspace)?;
    Ok(format!("{}{}/", REPORTS_PREFIX, workspace))
}

/// `reports/{workspace}/{surveyFolder}/`
pub fn survey_prefix(workspace: &str, survey_folder: &str) -> Result<String> {
    check_segment("survey folder name", survey_folder)?;
    Ok(format!("{}{}/", workspace_prefix(workspace)?, survey_folder))
}

/// Deterministic report key for a respondent
pub fn report_key(workspace: &str, survey_folder: &str, respondent_name: &str) -> Result<String> {
    let key = format!(
        "{}{}{}",
        survey_prefix(workspace, survey_folder)?,
        sanitize(respondent_name)?,
        REPORT_SUFFIX
    );
    validate_key(&key)?;
    Ok(key)
}

/// Pieces of a report key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKeyParts {
    pub workspace: String,
    pub survey_folder: String,
    /// Sanitized respondent name (file stem)
    pub respondent: String,
}

/// Split `reports/{ws}/{folder}/{name}.json`; `None` for anything else
pub fn parse_report_key(key: &str) -> Option<ReportKeyParts> {
    let rest = key.strip_prefix(REPORTS_PREFIX)?;
    let mut parts = rest.split('/');
    let workspace = parts.next()?;
    let survey_folder = parts.next()?;
    let file = parts.next()?;
    if parts.next().is_some() || workspace.is_empty() || survey_folder.is_empty() {
        return None;
    }
    let respondent = file.strip_suffix(REPORT_SUFFIX)?;
    if respondent.is_empty() {
        return None;
    }
    Some(ReportKeyParts {
        workspace: workspace.to_string(),
        survey_folder: survey_folder.to_string(),
        respondent: respondent.to_string(),
    })
}
