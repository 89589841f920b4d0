//! API error types and JSON error response formatting.
//!
//! Caller mistakes become `400 {"error": ...}`, an unreachable place
//! search becomes `503 {"error": ...}`. Every other failure is logged and
//! answered with a generic apology in the normal `{"response": ...}` shape,
//! so internal diagnostics never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use citypulse_chat::ChatError;

/// Reply used when a turn fails for a reason the caller cannot fix.
pub const GENERIC_APOLOGY: &str =
    "I'm sorry, something went wrong with the chat service. Please try again.";

const SEARCH_UNAVAILABLE: &str =
    "The place search service is currently unavailable. Please try again later.";

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// 503 Service Unavailable - a required collaborator cannot be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Unexpected failure; answered with [`GENERIC_APOLOGY`].
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg })).into_response()
            }
            ApiError::ServiceUnavailable(msg) => {
                tracing::warn!(reason = %msg, "Answering 503");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorBody {
                        error: SEARCH_UNAVAILABLE.to_string(),
                    }),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Chat turn failed");
                (
                    StatusCode::OK,
                    Json(serde_json::json!({ "response": GENERIC_APOLOGY })),
                )
                    .into_response()
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::MissingInput(msg) => ApiError::BadRequest(msg),
            ChatError::MessageTooLong(max) => ApiError::BadRequest(format!(
                "Message is too long. Please keep it under {} characters.",
                max
            )),
            ChatError::CollaboratorUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
