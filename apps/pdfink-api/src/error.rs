//! Error types for the pdfink API

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdfink_core::PdfInkError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// A required form field or body value is absent; the message is shown as-is
    #[error("{0}")]
    Missing(&'static str),

    #[error("Bad dataUrl")]
    BadDataUrl,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("save_failed")]
    SaveFailed(#[source] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] PdfInkError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Missing(_) | ApiError::BadDataUrl | ApiError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SaveFailed(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(e) => match e {
                PdfInkError::PageIndexOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PdfInkError::OcrEngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                PdfInkError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                e if e.is_bad_input() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Missing(_) => "MISSING_FIELD",
            ApiError::BadDataUrl => "BAD_DATA_URL",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::SaveFailed(_) => "SAVE_FAILED",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Core(e) => e.kind(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::InvalidRequest(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::SaveFailed(e) => {
                tracing::error!("Save failed: {}", e);
                self.to_string()
            }
            ApiError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                "Storage error".to_string()
            }
            _ if status.is_server_error() => {
                tracing::error!(code = self.code(), "{}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.code(),
        });

        (status, body).into_response()
    }
}
