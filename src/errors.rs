use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Domain errors for the approval engine.
///
/// The first group are expected, recoverable-by-caller outcomes and stay
/// distinguishable all the way to the API surface. `Database` and `Internal`
/// abort the current operation only; they never take down the scheduler
/// loop or the serving path.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("workflow not found")]
    WorkflowNotFound,

    #[error("approval request not found")]
    RequestNotFound,

    #[error("delegation not found")]
    DelegationNotFound,

    #[error("user is not authorized to decide this request")]
    UnauthorizedApprover,

    #[error("request has already been decided")]
    RequestAlreadyDecided,

    #[error("self-approval is not allowed")]
    SelfApprovalNotAllowed,

    #[error("record was modified by another request")]
    VersionConflict,

    #[error("only the requester can cancel the request")]
    NotRequester,

    #[error("an overlapping delegation already exists")]
    DelegationOverlap,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::WorkflowNotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "workflow_not_found",
                self.to_string(),
            ),
            AppError::RequestNotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "request_not_found",
                self.to_string(),
            ),
            AppError::DelegationNotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "delegation_not_found",
                self.to_string(),
            ),
            AppError::UnauthorizedApprover => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "unauthorized_approver",
                self.to_string(),
            ),
            AppError::RequestAlreadyDecided => (
                StatusCode::CONFLICT,
                "conflict",
                "request_already_decided",
                self.to_string(),
            ),
            AppError::SelfApprovalNotAllowed => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "self_approval_not_allowed",
                self.to_string(),
            ),
            AppError::VersionConflict => (
                StatusCode::CONFLICT,
                "conflict",
                "version_conflict",
                self.to_string(),
            ),
            AppError::NotRequester => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "not_requester",
                self.to_string(),
            ),
            AppError::DelegationOverlap => (
                StatusCode::CONFLICT,
                "conflict",
                "delegation_overlap",
                self.to_string(),
            ),
            AppError::InvalidInput(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_input",
                reason.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
