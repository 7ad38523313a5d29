//! HTTP API handlers for csp-tracker

pub mod health;
pub mod submissions;

pub use health::health_routes;
pub use submissions::{
    get_submission_resource, get_survey, post_submission_action, register_survey,
};
