use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use std::fmt;

// Define our custom error type
#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    /// An external tool (yt-dlp, rclone) ran but reported failure.
    Tool(String),
    BadRequest(String),
    Conflict(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "{e:#}"),
            AppError::Tool(e) => write!(f, "tool error: {e}"),
            AppError::BadRequest(e) | AppError::Conflict(e) | AppError::NotFound(e) => {
                f.write_str(e)
            }
        }
    }
}

// This implementation allows us to convert our AppError into a valid HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(e) => {
                // Log the full error for debugging
                tracing::error!("Internal server error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
            AppError::Tool(e) => (StatusCode::BAD_GATEWAY, format!("tool error: {}", e)),
            AppError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            AppError::Conflict(e) => (StatusCode::CONFLICT, e),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

// Lets `?` turn any `std::error::Error` into `AppError::Internal`.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
