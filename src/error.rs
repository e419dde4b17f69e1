//! # Error Handling and Response Types
//!
//! This module provides error handling for the repository server. It defines
//! the application error taxonomy, the standardized JSON error response format
//! and the HTTP status code mapping used by every API endpoint.
//!
//! ## Key Types
//!
//! - [`AppError`]: Main error enum covering all possible application errors
//! - [`ApiErrorResponse`]: Standardized JSON error response format
//! - [`ErrorCode`]: Machine-readable error classification
//! - [`AppResult<T>`]: Convenience type alias for Results using `AppError`
//!
//! ## Error Classifications
//!
//! - **Validation / Configuration Errors** (400 Bad Request)
//! - **Not Found** (404 Not Found): absent repository, project, version or file
//! - **Conflict** (409 Conflict): duplicate artifact or repository name
//! - **Upstream Unavailable** (502 Bad Gateway): an upstream registry could
//!   not be reached and no usable cache exists — distinct from 404 so callers
//!   can tell "does not exist" from "could not be determined right now"
//! - **Upload Errors** (413 Payload Too Large)
//! - **Internal / Storage Errors** (500 Internal Server Error): fatal to the
//!   single operation, never to the process

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// Standardized error response structure for consistent API error handling
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,          // Human-readable error message
    pub code: String,           // Machine-readable error code
    pub details: Option<Value>, // Additional error details
    pub timestamp: String,      // ISO 8601 timestamp
}

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    ValidationError,     // For input/configuration validation failures
    NotFound,            // For missing resources
    Conflict,            // For duplicate artifacts or repository names
    UpstreamUnavailable, // For unreachable upstream registries
    UploadError,         // For file upload issues
    InternalError,       // For server-side errors
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::UploadError => "upload_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::UploadError => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-specific error types with error codes
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Multipart form parsing error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate artifact or duplicate repository name. Never silently
    /// overwritten.
    #[error("{0}")]
    Conflict(String),

    /// Repository creation rejected before any storage side effect.
    #[error("invalid repository configuration: {0}")]
    InvalidConfiguration(String),

    /// Upstream fetch failed or timed out and no usable cache entry exists.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    UploadError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidConfiguration(_)
            | AppError::Json(_)
            | AppError::Multipart(_) => ErrorCode::ValidationError,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            AppError::UploadError(_) => ErrorCode::UploadError,
            AppError::InternalError(_) | AppError::Io(_) | AppError::Anyhow(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Anyhow(e) => e
                .source()
                .map(|source| json!({"source": source.to_string()})),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before moving values out
        tracing::error!(error = %self, "Request failed");

        let error_response = self.to_error_response();
        let status = self.error_code().http_status();

        if matches!(self.error_code(), ErrorCode::InternalError) {
            if let AppError::Anyhow(ref e) = self {
                tracing::error!(source = ?e.source(), "Internal server error details");
            }
        }

        tracing::debug!(status = %status, code = %error_response.code, "Returning standardized error response");

        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for application operations.
///
/// This type alias provides a standard Result type using [`AppError`] for all
/// application-level operations, reducing boilerplate in function signatures.
pub type AppResult<T> = Result<T, AppError>;
