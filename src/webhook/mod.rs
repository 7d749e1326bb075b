//! Validating Admission Webhook for SeldonDeployments
//!
//! The API server calls this webhook on SeldonDeployment create and update.
//! Graphs that the compiler could not lower (duplicate predictors, user units
//! without a container, units with no way to route to them) are rejected
//! before they are stored.

pub mod seldon_deployment;

use axum::{routing::post, Router};

/// Create the webhook router with all validation endpoints
///
/// Currently supports:
/// - POST /validate/seldondeployments - Validate SeldonDeployment graphs
pub fn webhook_router() -> Router {
    Router::new().route(
        "/validate/seldondeployments",
        post(seldon_deployment::validate_handler),
    )
}
