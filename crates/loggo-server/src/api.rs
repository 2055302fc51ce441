//! Shared API plumbing: the error type and the health check.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use loggo_events::{LoadError, StoreError};
use serde_json::{json, Value};
use thiserror::Error;

use crate::pipeline::IngestError;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::ChannelNotFound(_) => ApiError::NotFound(e.to_string()),
            IngestError::Malformed(_) => ApiError::BadRequest(e.to_string()),
            IngestError::Storage(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else {
            tracing::error!(error = %e, "storage error while serving request");
            ApiError::InternalServerError(e.to_string())
        }
    }
}

impl From<LoadError> for ApiError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            LoadError::Storage { .. } => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        tracing::error!(error = %e, "failed to get database connection");
        ApiError::InternalServerError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        tracing::error!(error = %e, "blocking task panicked or was cancelled");
        ApiError::InternalServerError(e.to_string())
    }
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
