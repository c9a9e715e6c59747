//! HTTP error type
//!
//! Feature errors convert into [`AppError`], which renders the standard error
//! envelope. Internal details are logged and never sent to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::features::bulk_uploads::{ListBulkUploadsError, SubmitError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: limit is {max_bytes} bytes")]
    PayloadTooLarge { max_bytes: usize },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match self {
            AppError::NotFound(message)
            | AppError::BadRequest(message)
            | AppError::Validation(message) => ErrorResponse::new(code, message),
            AppError::PayloadTooLarge { max_bytes } => ErrorResponse::with_details(
                code,
                "Uploaded file is too large",
                json!({ "max_bytes": max_bytes }),
            ),
            AppError::Unavailable(message) => {
                tracing::error!("Service unavailable: {}", message);
                ErrorResponse::new(code, "Service unavailable")
            },
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                ErrorResponse::new(code, "Internal Server Error")
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::TooLarge { max_bytes } => AppError::PayloadTooLarge { max_bytes },
            SubmitError::FileMissing => AppError::BadRequest(err.to_string()),
            e if e.is_client_error() => AppError::Validation(e.to_string()),
            e => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ListBulkUploadsError> for AppError {
    fn from(err: ListBulkUploadsError) -> Self {
        match err {
            ListBulkUploadsError::NotFound(_) => AppError::NotFound(err.to_string()),
            ListBulkUploadsError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

/// Alias for Result with AppError
pub type ApiResult<T> = Result<T, AppError>;
