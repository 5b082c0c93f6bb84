//! Error types for the Folio delivery engine
//!
//! The engine layers (pool, cache, render service) return `DeliveryError`
//! values; only the HTTP layer turns them into responses via `IntoResponse`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for engine operations
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Unknown document, session or resource id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Page index outside the document
    #[error("Page {page} not found (document has {page_count} pages)")]
    PageNotFound { page: usize, page_count: usize },

    /// Byte range cannot be satisfied for a file of `size` bytes
    #[error("Requested range not satisfiable for {size} bytes")]
    InvalidRange { size: u64 },

    /// Unrecoverable request validation failure
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request names a resource the server refuses to expose
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Backend failed to open the document
    #[error("Failed to open document: {0}")]
    Open(String),

    /// Backend failed to render a page
    #[error("Render error: {0}")]
    Render(String),

    /// Render did not finish in time
    #[error("Render timed out after {0} seconds")]
    RenderTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// HTTP status the delivery server answers with
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeliveryError::NotFound(_) | DeliveryError::PageNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            DeliveryError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            DeliveryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DeliveryError::Forbidden(_) => StatusCode::FORBIDDEN,
            DeliveryError::RenderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DeliveryError::Open(_)
            | DeliveryError::Render(_)
            | DeliveryError::Io(_)
            | DeliveryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DeliveryError::NotFound(_) | DeliveryError::PageNotFound { .. } => "not_found",
            DeliveryError::InvalidRange { .. } => "invalid_range",
            DeliveryError::BadRequest(_) => "bad_request",
            DeliveryError::Forbidden(_) => "forbidden",
            DeliveryError::Open(_) => "open_error",
            DeliveryError::Render(_) => "render_error",
            DeliveryError::RenderTimeout(_) => "render_timeout",
            DeliveryError::Io(_) => "io_error",
            DeliveryError::Internal(_) => "internal_error",
        }
    }
}

impl From<mupdf::Error> for DeliveryError {
    fn from(err: mupdf::Error) -> Self {
        DeliveryError::Render(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DeliveryError {
    fn from(err: tokio::task::JoinError) -> Self {
        DeliveryError::Internal(format!("Task join error: {}", err))
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.kind(),
            message: self.to_string(),
        });

        match self {
            DeliveryError::InvalidRange { size } => (
                status,
                [
                    (header::CONTENT_RANGE, format!("bytes */{}", size)),
                    (header::CACHE_CONTROL, "no-store".to_string()),
                ],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
