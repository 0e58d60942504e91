use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crate::services::error::StorageError;
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = match &err {
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidPath(_)
            | StorageError::InvalidInput(_)
            | StorageError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            StorageError::Auth(_) => StatusCode::UNAUTHORIZED,
            StorageError::OperationFailed(_) | StorageError::Remote(_) | StorageError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            StorageError::OperationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            StorageError::RestoreFailed { .. } | StorageError::Json(_) | StorageError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("{}", err);
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        let cases = [
            (StorageError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StorageError::InvalidPath("x".into()), StatusCode::BAD_REQUEST),
            (StorageError::ValidationFailed(vec!["definition/".into()]), StatusCode::BAD_REQUEST),
            (StorageError::OperationFailed("x".into()), StatusCode::BAD_GATEWAY),
            (StorageError::OperationTimeout { attempts: 3 }, StatusCode::GATEWAY_TIMEOUT),
            (StorageError::Auth("x".into()), StatusCode::UNAUTHORIZED),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }
}
