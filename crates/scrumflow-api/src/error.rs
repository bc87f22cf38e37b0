//! HTTP error mapping.
//!
//! Every handler returns `Result<_, ApiError>`. Validation failures (400)
//! and server failures (500) render as `{"error": ..., "details": ...}`;
//! 401 and 404 render as `{"error": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or invalid request input.
    #[error("{error}: {details}")]
    BadRequest { error: String, details: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    /// A trigger or query that failed downstream.
    #[error("{error}: {details}")]
    Internal { error: String, details: String },
}

impl ApiError {
    /// 400 with a caller-facing summary and what exactly was wrong.
    pub fn bad_request(error: impl Into<String>, details: impl std::fmt::Display) -> Self {
        ApiError::BadRequest {
            error: error.into(),
            details: details.to_string(),
        }
    }

    /// 500 with a caller-facing summary and the underlying cause as details.
    pub fn internal(error: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            error: error.into(),
            details: cause.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<scrumflow_core::Error> for ApiError {
    fn from(err: scrumflow_core::Error) -> Self {
        match err {
            scrumflow_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            scrumflow_core::Error::InvalidInput(msg) => ApiError::bad_request("Invalid request", msg),
            scrumflow_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            other => ApiError::internal("Internal server error", other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Internal { error, details } => {
                tracing::error!(
                    subsystem = "api",
                    status = status.as_u16(),
                    error = %error,
                    details = %details,
                    "Request failed"
                );
                json!({ "error": error, "details": details })
            }
            ApiError::BadRequest { error, details } => json!({ "error": error, "details": details }),
            ApiError::NotFound(msg) | ApiError::Unauthorized(msg) => {
                json!({ "error": msg })
            }
        };

        (status, Json(body)).into_response()
    }
}
