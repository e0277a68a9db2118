//! # Verification Query Service
//!
//! Answers "is this certificate valid right now" for external verifiers.
//!
//! Failing to reach the ledger is reported as `ledger_unavailable` with
//! `is_valid: null` and HTTP 503. It is never collapsed into `is_valid:
//! false`: the truth is unknown, not negative.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use farmcert_core::{CertificateId, Clock, FarmerId, Timestamp};
use farmcert_ledger::{Ledger, LedgerError};
use farmcert_registry::{VerificationOutcome, VerificationResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What a verifier is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Valid,
    Expired,
    Revoked,
    NotFound,
    /// The ledger could not be read; validity is unknown.
    LedgerUnavailable,
}

impl From<VerificationOutcome> for VerificationStatus {
    fn from(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Valid => Self::Valid,
            VerificationOutcome::Expired => Self::Expired,
            VerificationOutcome::Revoked => Self::Revoked,
            VerificationOutcome::NotFound => Self::NotFound,
        }
    }
}

/// Verification response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    /// `null` when the ledger is unavailable.
    pub is_valid: Option<bool>,
    #[schema(value_type = Option<String>)]
    pub certificate_id: Option<CertificateId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub farmer_id: Option<FarmerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farmer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub issued_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub expires_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
    pub reason: String,
    #[schema(value_type = String, format = DateTime)]
    pub checked_at: Timestamp,
}

impl VerificationReport {
    fn unavailable(certificate_id: Option<CertificateId>, err: &LedgerError, now: Timestamp) -> Self {
        Self {
            status: VerificationStatus::LedgerUnavailable,
            is_valid: None,
            certificate_id,
            farmer_id: None,
            farmer_name: None,
            issued_at: None,
            expires_at: None,
            revocation_reason: None,
            reason: format!("verification currently unavailable: {}", unavailable_reason(err)),
            checked_at: now,
        }
    }

    /// HTTP status the report is served with.
    pub fn http_status(&self) -> StatusCode {
        match self.status {
            VerificationStatus::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            VerificationStatus::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::OK,
        }
    }
}

fn unavailable_reason(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::ChainUnavailable { .. } => "ledger unreachable",
        LedgerError::UnknownTransaction(_) => "ledger state inconsistent",
        LedgerError::Rejected(_) => "ledger refused the query",
    }
}

impl From<VerificationResult> for VerificationReport {
    fn from(r: VerificationResult) -> Self {
        Self {
            status: r.outcome.into(),
            is_valid: Some(r.is_valid),
            certificate_id: r.certificate_id,
            farmer_id: r.farmer_id,
            farmer_name: r.farmer_name,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            revocation_reason: r.revocation_reason,
            reason: r.reason,
            checked_at: r.checked_at,
        }
    }
}

impl IntoResponse for VerificationReport {
    fn into_response(self) -> Response {
        (self.http_status(), Json(self)).into_response()
    }
}

/// Composition over the registry's two read paths.
#[derive(Debug, Clone)]
pub struct VerificationService {
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
}

impl VerificationService {
    pub fn new(ledger: Arc<dyn Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Verify a certificate by id.
    pub async fn by_id(&self, certificate_id: &CertificateId) -> VerificationReport {
        let result = self.ledger.certificate(certificate_id).await;
        let now = self.clock.now();
        match result {
            Ok(Some(cert)) => VerificationResult::from_certificate(&cert, now).into(),
            Ok(None) => VerificationResult::not_found(
                Some(certificate_id.clone()),
                format!("no certificate {certificate_id}"),
                now,
            )
            .into(),
            Err(err) => {
                tracing::warn!(%certificate_id, error = %err, "verification read failed");
                VerificationReport::unavailable(Some(certificate_id.clone()), &err, now)
            }
        }
    }

    /// Verify the most recently issued certificate of a farmer.
    pub async fn by_subject(&self, farmer_id: &FarmerId) -> VerificationReport {
        let result = self.ledger.latest_for_subject(farmer_id).await;
        let now = self.clock.now();
        match result {
            Ok(Some(cert)) => VerificationResult::from_certificate(&cert, now).into(),
            Ok(None) => {
                VerificationResult::not_found(None, format!("no certificate for farmer {farmer_id}"), now)
                    .into()
            }
            Err(err) => {
                tracing::warn!(%farmer_id, error = %err, "verification read failed");
                VerificationReport::unavailable(None, &err, now)
            }
        }
    }
}
