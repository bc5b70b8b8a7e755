//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::review::{RepositoryError, ReviewError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// No admin token is configured, so the protected API is off.
    #[error("API is disabled (ADMIN_AUTH_TOKEN not configured)")]
    Disabled,

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Review(#[from] ReviewError),
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        ApiError::Review(ReviewError::Repository(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Review(e) => match e {
                ReviewError::InvalidId(_) => StatusCode::BAD_REQUEST,
                ReviewError::NotFound(_) | ReviewError::NotAssignable { .. } => {
                    StatusCode::NOT_FOUND
                }
                ReviewError::Removed { .. }
                | ReviewError::Transition { .. }
                | ReviewError::Constraint(_)
                | ReviewError::AlreadyStarted(_)
                | ReviewError::CountLimit(_) => StatusCode::PRECONDITION_FAILED,
                ReviewError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manual_review_core::{InvalidId, ReviewState, StepKey, SubmissionKey};

    #[test]
    fn test_review_errors_map_to_statuses() {
        let cases = [
            (
                ApiError::from(ReviewError::NotFound("step x".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(ReviewError::Removed {
                    step: StepKey::from("x"),
                }),
                StatusCode::PRECONDITION_FAILED,
            ),
            (
                ApiError::from(ReviewError::Transition {
                    step: StepKey::from("x"),
                    before: ReviewState::Completed,
                    after: ReviewState::Expired,
                }),
                StatusCode::PRECONDITION_FAILED,
            ),
            (
                ApiError::from(RepositoryError::storage("commit", "disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::from(ReviewError::InvalidId(InvalidId::Empty { kind: "unit" })),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(ReviewError::CountLimit(SubmissionKey::from("u1:alice"))),
                StatusCode::PRECONDITION_FAILED,
            ),
            (ApiError::Disabled, StatusCode::SERVICE_UNAVAILABLE),
            (
                ApiError::BadRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.status(), status, "{}", error);
        }
    }
}
