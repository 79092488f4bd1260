//! Mapping from core errors to HTTP responses.
//!
//! Every failure body has the same shape: `{"status": "error", "message": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::error::{AlertError, QueryError, StorageError};

// ---

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Storage(StorageError),
    Alert(AlertError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Storage(e) => ApiError::Storage(e),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<AlertError> for ApiError {
    fn from(e: AlertError) -> Self {
        match e {
            AlertError::Storage(e) => ApiError::Storage(e),
            other => ApiError::Alert(other),
        }
    }
}

fn storage_status(e: &StorageError) -> (StatusCode, &'static str) {
    match e {
        StorageError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "database query timeout"),
        StorageError::Connection { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "database temporarily unavailable",
        ),
        StorageError::Failed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "database error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => {
                warn!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Storage(e) => {
                error!(error_code = e.code(), error = %e, "Storage failure while serving request");
                let (status, msg) = storage_status(e);
                (status, msg.to_string())
            }
            ApiError::Alert(e) => {
                error!(error = %e, "Alert evaluation failed");
                let status = match e {
                    AlertError::NoRecipient => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.to_string())
            }
        };

        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}
