//! Shared preconditions for every mutating endpoint (spec §4.9): a JSON
//! content-type and a valid, single-use CSRF token.

use axum::http::HeaderMap;

use crate::error::ApiError;
use crate::state::AppState;

pub fn require_json_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/json") {
        return Err(ApiError::UnsupportedMediaType(
            "expected content-type: application/json".into(),
        ));
    }
    Ok(())
}

pub fn require_csrf(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing X-CSRF-Token header"))?;
    if !state.csrf.validate(token) {
        return Err(ApiError::bad_request("invalid or expired CSRF token"));
    }
    Ok(())
}
