use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the approval API router.
/// All routes are relative — the caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/approvals/check", post(handlers::check_approval))
        .route(
            "/approvals/requests",
            get(handlers::list_requests).post(handlers::create_request),
        )
        .route("/approvals/requests/mine", get(handlers::list_my_requests))
        .route("/approvals/requests/:id", get(handlers::get_request))
        .route(
            "/approvals/requests/:id/decision",
            post(handlers::decide_request),
        )
        .route(
            "/approvals/requests/:id/cancel",
            post(handlers::cancel_request),
        )
        .route(
            "/approvals/requests/:id/history",
            get(handlers::request_history),
        )
        .route("/workflows", get(handlers::list_workflows))
        .route("/workflows/:id", patch(handlers::update_workflow))
        .route(
            "/delegations",
            post(handlers::create_delegation),
        )
        .route("/delegations/outgoing", get(handlers::list_outgoing_delegations))
        .route("/delegations/incoming", get(handlers::list_incoming_delegations))
        .route("/delegations/:id/revoke", post(handlers::revoke_delegation))
        .layer(TraceLayer::new_for_http())
}
