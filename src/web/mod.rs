//! HTTP surface of the router.
//!
//! Handlers resolve a queue's partitions through the shared cache, pick one,
//! forward the request and relay whatever the partition answers.

pub mod app;
pub mod forward;
pub mod handlers;
pub mod requests;

use crate::discovery::DiscoveryError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub use app::build_router;
pub use forward::{ForwardConfig, ForwardError, Forwarder};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors returned to clients.
///
/// Messages are short and opaque; internal details are logged where the error
/// is raised and never reach the response body.
#[derive(Debug, Error)]
pub enum WebError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DiscoveryError> for WebError {
    fn from(_: DiscoveryError) -> Self {
        WebError::internal("Failed to get partitions for queue")
    }
}

impl From<ForwardError> for WebError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Build(_) => WebError::internal("Failed to assemble forwarding request"),
            ForwardError::Send(_) => WebError::internal("Failed to forward request"),
            ForwardError::Read(_) => WebError::internal("Failed to read partition response"),
            ForwardError::Client(_) => WebError::internal("Forwarding client unavailable"),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, code) = match self {
            WebError::BadRequest(msg) => (msg, "bad_request"),
            WebError::NotFound(msg) => (msg, "not_found"),
            WebError::Internal(msg) => (msg, "internal_error"),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
