use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

/// Uniform error shape for every handler. `details` carries per-field
/// validation messages (spec §4.9's config-save contract); most errors
/// leave it empty.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest { message: String, details: Vec<String> },
    UnsupportedMediaType(String),
    TooManyRequests,
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest { message: message.into(), details: Vec::new() }
    }

    pub fn validation(details: Vec<String>) -> Self {
        ApiError::BadRequest { message: "validation failed".into(), details }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, Vec::new()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, Vec::new()),
            ApiError::BadRequest { message, details } => (StatusCode::BAD_REQUEST, message, details),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg, Vec::new()),
            ApiError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded".into(), Vec::new()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, Vec::new()),
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}
