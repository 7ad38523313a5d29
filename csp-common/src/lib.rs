//! # CSP Common Library
//!
//! Shared code for the survey response services:
//! - Report model and category scoring
//! - Submission lifecycle records and API wire types
//! - Error taxonomy
//! - Configuration loading
//! - Tracing filter bootstrap
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod report;
pub mod submission;
pub mod time;

pub use error::{Error, Result};
pub use report::{Enrichment, EnrichmentStatus, Report, ReportDraft, RespondentInfo};
pub use submission::{SubmissionRecord, SubmissionStatus};
