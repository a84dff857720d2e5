use crate::services::{
    category_service::CategoryError, content_store::ContentStoreError, registrar::RegistrarError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned by HTTP handlers; carries the status it maps to.
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
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ContentStoreError> for AppError {
    fn from(err: ContentStoreError) -> Self {
        let status = match &err {
            ContentStoreError::NotFound(_) => StatusCode::NOT_FOUND,
            ContentStoreError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ContentStoreError::AlreadyExists { .. } => StatusCode::CONFLICT,
            ContentStoreError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<CategoryError> for AppError {
    fn from(err: CategoryError) -> Self {
        match err {
            CategoryError::EmptyName => AppError::bad_request(err.to_string()),
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<RegistrarError> for AppError {
    fn from(err: RegistrarError) -> Self {
        match err {
            RegistrarError::Invalid(_) => AppError::bad_request(err.to_string()),
            _ => AppError::internal(err.to_string()),
        }
    }
}
