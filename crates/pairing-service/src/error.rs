//! Error types for the pairing service.

use crate::phone::ValidationError;
use crate::session::RegistryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Message returned in place of internal error details.
const INTERNAL_MESSAGE: &str = "An unexpected error occurred";

/// Service error types.
#[derive(Debug, Error)]
pub enum PairError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    RateLimitExceeded(String),

    #[error("Failed to generate pairing code: {0}")]
    PairingFailed(String),

    #[error("Invalid admin key")]
    Forbidden,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PairError {
    pub fn status(&self) -> StatusCode {
        match self {
            PairError::Validation(_) => StatusCode::BAD_REQUEST,
            PairError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            PairError::PairingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PairError::Forbidden => StatusCode::FORBIDDEN,
            PairError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PairError::Validation(_) => "VALIDATION_ERROR",
            PairError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            PairError::PairingFailed(_) => "PAIRING_FAILED",
            PairError::Forbidden => "FORBIDDEN",
            PairError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show the caller.
    pub fn public_message(&self, expose_internal: bool) -> String {
        match self {
            PairError::Internal(_) if !expose_internal => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RegistryError> for PairError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::CapacityExceeded { .. } => PairError::RateLimitExceeded(e.to_string()),
            RegistryError::DuplicateId(_) => PairError::Internal(e.to_string()),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub error: String,
    pub message: String,
}

/// An error tied to one request.
#[derive(Debug)]
pub struct ApiError {
    pub request_id: Option<String>,
    pub error: PairError,
    pub expose_internal: bool,
}

impl ApiError {
    pub fn new(request_id: impl Into<String>, error: impl Into<PairError>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            error: error.into(),
            expose_internal: false,
        }
    }

    pub fn exposing_internal(mut self, expose: bool) -> Self {
        self.expose_internal = expose;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            request_id: self.request_id,
            error: self.error.code().to_string(),
            message: self.error.public_message(self.expose_internal),
        };

        (self.error.status(), Json(body)).into_response()
    }
}

impl IntoResponse for PairError {
    fn into_response(self) -> Response {
        ApiError {
            request_id: None,
            error: self,
            expose_internal: false,
        }
        .into_response()
    }
}
