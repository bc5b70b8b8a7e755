//! Bearer token check for the admin API.

use axum::http::{header, HeaderMap};

use crate::error::ApiError;

/// Validate the authorization header against the admin token.
///
/// With no token configured every protected endpoint is disabled.
pub fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), ApiError> {
    let Some(expected_token) = auth_token else {
        return Err(ApiError::Disabled);
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided) if provided == expected_token => Ok(()),
            Some(_) => Err(ApiError::Unauthorized("Invalid token")),
            None => Err(ApiError::Unauthorized(
                "Invalid Authorization header format. Expected: Bearer <token>",
            )),
        },
        None => Err(ApiError::Unauthorized(
            "Missing Authorization header. Expected: Bearer <token>",
        )),
    }
}
