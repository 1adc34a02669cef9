use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a set of security codes was not accepted.
///
/// These are expected business outcomes, returned as values rather than
/// raised. The serialized form is the variant name (e.g. `"AlreadyUsed"`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityRejection {
    /// No session with the given id exists.
    #[error("Session not found")]
    NotFound,

    /// The codes were already consumed by an earlier validation.
    #[error("Security codes already used")]
    AlreadyUsed,

    /// The session outlived its expiry and has been removed.
    #[error("Security codes expired")]
    Expired,

    /// One or both codes do not match the issued pair.
    #[error("Invalid security codes")]
    CodeMismatch,

    /// The caller's user id differs from the one the session is bound to.
    #[error("User mismatch")]
    UserMismatch,

    /// The session is missing, used, or expired and cannot be refreshed.
    #[error("Session not found or expired")]
    RefreshPreconditionFailed,
}

impl SecurityRejection {
    /// The HTTP status used when this rejection crosses the API boundary.
    pub fn status_code(self) -> StatusCode {
        match self {
            SecurityRejection::RefreshPreconditionFailed => StatusCode::NOT_FOUND,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Presented codes were rejected.
    #[error("Security check failed: {0}")]
    Rejected(#[from] SecurityRejection),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// The caller exceeded the request quota.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Rejected(reason) => {
                tracing::warn!("Security check failed: {:?}", reason);
                (
                    reason.status_code(),
                    sonic_rs::to_string(&sonic_rs::json!({
                        "error": reason.to_string(),
                        "valid": false,
                        "reason": format!("{:?}", reason),
                    })),
                )
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    sonic_rs::to_string(&sonic_rs::json!({ "error": msg })),
                )
            }

            AppError::Configuration(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    sonic_rs::to_string(&sonic_rs::json!({ "error": "Internal server error" })),
                )
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    sonic_rs::to_string(&sonic_rs::json!({ "error": "Internal server error" })),
                )
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    sonic_rs::to_string(&sonic_rs::json!({ "error": msg })),
                )
            }
        };

        let body = body.unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
