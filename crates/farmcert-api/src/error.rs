//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from farmcert-core, farmcert-ledger and the
//! orchestrator to HTTP status codes with a JSON body. Internal and upstream
//! details are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use farmcert_ledger::LedgerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::documents::{DocumentStoreError, DocumentType};
use crate::orchestration::OrchestrationError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "INCOMPLETE_DOCUMENTS").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for some client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Approval requested before both documents were uploaded (422).
    #[error("incomplete documents: missing {}", list(.0))]
    IncompleteDocuments(Vec<DocumentType>),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid token (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient permissions, including a non-admin registry signer (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The ledger could not be reached (503). Detail is logged only.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

fn list(types: &[DocumentType]) -> String {
    types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::IncompleteDocuments(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INCOMPLETE_DOCUMENTS")
            }
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::LedgerUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "LEDGER_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::LedgerUnavailable(_) => {
                "The certificate ledger is temporarily unavailable; retry later".to_string()
            }
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "server error");
        }

        let details = match &self {
            Self::IncompleteDocuments(missing) => Some(serde_json::json!({ "missing": missing })),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<farmcert_core::ValidationError> for AppError {
    fn from(err: farmcert_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(_) => Self::Internal(err.to_string()),
            other => Self::LedgerUnavailable(other.to_string()),
        }
    }
}

impl From<OrchestrationError> for AppError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::IncompleteDocuments { missing } => Self::IncompleteDocuments(missing),
            OrchestrationError::Document { source, .. } => match source {
                DocumentStoreError::NotFound(_) | DocumentStoreError::InvalidRef(_) => {
                    Self::Validation(source.to_string())
                }
                DocumentStoreError::Io(_) => Self::Internal(source.to_string()),
            },
            OrchestrationError::Ledger(e) => e.into(),
            OrchestrationError::Submit(e) => Self::Internal(e.to_string()),
            OrchestrationError::Store(e) => Self::Internal(e.to_string()),
            OrchestrationError::Validation(msg) => Self::Validation(msg),
            OrchestrationError::Forbidden(msg) => Self::Forbidden(msg),
            OrchestrationError::Conflict(msg) => Self::Conflict(msg),
            OrchestrationError::NotFound(msg) => Self::NotFound(msg),
        }
    }
}
