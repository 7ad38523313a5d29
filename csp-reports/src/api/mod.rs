//! HTTP API handlers for csp-reports

pub mod health;
pub mod reports;
pub mod stats;

pub use health::health_routes;
pub use reports::{create_report, list_reports, list_survey_folders};
pub use stats::{get_overview, get_trend};
