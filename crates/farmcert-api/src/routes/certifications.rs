//! # Certification Routes
//!
//! Admin decisions, revocation, transaction status and reconciliation, plus
//! the verification queries any authenticated caller may make.
//!
//! Decisions and revocations that are still awaiting the ledger answer
//! `202 Accepted` with the correlation id to follow up on. A ledger revert
//! is a business outcome and answers `200` with outcome `failed`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use farmcert_core::{CertificateId, FarmerId};
use farmcert_ledger::TransactionRecord;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_path, Validate};
use crate::orchestration::{AdminDecision, DecisionOutcome, ReconcileReport, WriteOutcome, WriteState};
use crate::state::AppState;
use crate::statistics::{aggregate, CertificationStatistics};
use crate::verification::VerificationReport;

/// Build the certification router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/certifications/stats", get(statistics))
        .route("/certifications/by-id/:certificate_id", get(verify_by_id))
        .route("/certifications/by-id/:certificate_id/revoke", post(revoke))
        .route("/certifications/by-subject/:farmer_id", get(verify_by_subject))
        .route("/certifications/transactions/:correlation_id", get(transaction))
        .route("/certifications/:farmer_id/decide", post(decide))
        .route("/certifications/:farmer_id/reconcile", post(reconcile))
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Decision kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Admin decision on a farmer's application.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequest {
    pub decision: Decision,
    #[serde(default)]
    pub remarks: Option<String>,
    /// Overrides the name recorded at upload.
    #[serde(default)]
    pub farmer_name: Option<String>,
    /// Certificate id to issue under. Generated when absent.
    #[serde(default)]
    pub certificate_id: Option<String>,
}

impl Validate for DecideRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(remarks) = &self.remarks {
            if remarks.len() > 2000 {
                return Err("remarks must not exceed 2000 characters".into());
            }
        }
        if self.decision == Decision::Reject && (self.farmer_name.is_some() || self.certificate_id.is_some()) {
            return Err("farmerName and certificateId apply to approvals only".into());
        }
        if let Some(name) = &self.farmer_name {
            if name.trim().is_empty() || name.len() > 256 {
                return Err("farmerName must be 1 to 256 characters".into());
            }
        }
        Ok(())
    }
}

impl DecideRequest {
    fn into_decision(self) -> Result<AdminDecision, AppError> {
        let remarks = self.remarks.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        Ok(match self.decision {
            Decision::Approve => AdminDecision::Approve {
                farmer_name: self.farmer_name,
                certificate_id: self.certificate_id.map(CertificateId::new).transpose()?,
                remarks,
            },
            Decision::Reject => AdminDecision::Reject { remarks },
        })
    }
}

/// Revoke a certificate.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub reason: String,
}

impl Validate for RevokeRequest {
    fn validate(&self) -> Result<(), String> {
        if self.reason.trim().is_empty() {
            return Err("reason must not be empty".into());
        }
        if self.reason.len() > 1000 {
            return Err("reason must not exceed 1000 characters".into());
        }
        Ok(())
    }
}

/// Response wrapper choosing 202 for writes still awaiting the ledger.
#[derive(Debug)]
struct Accepted<T>(T, bool);

impl<T: Serialize> IntoResponse for Accepted<T> {
    fn into_response(self) -> Response {
        let status = if self.1 { StatusCode::ACCEPTED } else { StatusCode::OK };
        (status, Json(self.0)).into_response()
    }
}

fn write_response(outcome: WriteOutcome) -> Accepted<WriteOutcome> {
    let pending = outcome.state == WriteState::PendingConfirmation;
    Accepted(outcome, pending)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /certifications/{farmer_id}/decide: approve or reject an application.
#[utoipa::path(
    post,
    path = "/certifications/{farmer_id}/decide",
    params(("farmer_id" = String, Path, description = "Farmer identifier")),
    request_body = DecideRequest,
    responses(
        (status = 200, description = "certified, failed or rejected", body = DecisionOutcome),
        (status = 202, description = "pending_confirmation", body = DecisionOutcome),
        (status = 403, description = "Caller is not admin, or the service signer is not the registry admin"),
        (status = 404, description = "Unknown farmer (reject)"),
        (status = 409, description = "Conflicting farmer state"),
        (status = 422, description = "Incomplete documents or invalid request"),
        (status = 503, description = "Ledger unavailable"),
    ),
    tag = "certifications"
)]
async fn decide(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(farmer_id): Path<String>,
    body: Result<Json<DecideRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    require_role(&caller, Role::Admin)?;
    let farmer_id: FarmerId = parse_path(farmer_id)?;
    let decision = extract_validated_json(body)?.into_decision()?;

    let outcome = state.orchestrator.decide(&farmer_id, decision).await?;
    let pending = matches!(outcome, DecisionOutcome::PendingConfirmation { .. });
    Ok(Accepted(outcome, pending))
}

/// GET /certifications/by-id/{certificate_id}: verify a certificate.
#[utoipa::path(
    get,
    path = "/certifications/by-id/{certificate_id}",
    params(("certificate_id" = String, Path, description = "Certificate identifier")),
    responses(
        (status = 200, description = "valid, expired or revoked", body = VerificationReport),
        (status = 404, description = "not_found", body = VerificationReport),
        (status = 503, description = "ledger_unavailable", body = VerificationReport),
    ),
    tag = "certifications"
)]
async fn verify_by_id(
    State(state): State<AppState>,
    Path(certificate_id): Path<String>,
) -> Result<VerificationReport, AppError> {
    let certificate_id: CertificateId = parse_path(certificate_id)?;
    Ok(state.verification.by_id(&certificate_id).await)
}

/// GET /certifications/by-subject/{farmer_id}: verify a farmer's latest certificate.
#[utoipa::path(
    get,
    path = "/certifications/by-subject/{farmer_id}",
    params(("farmer_id" = String, Path, description = "Farmer identifier")),
    responses(
        (status = 200, description = "valid, expired or revoked", body = VerificationReport),
        (status = 404, description = "not_found", body = VerificationReport),
        (status = 503, description = "ledger_unavailable", body = VerificationReport),
    ),
    tag = "certifications"
)]
async fn verify_by_subject(
    State(state): State<AppState>,
    Path(farmer_id): Path<String>,
) -> Result<VerificationReport, AppError> {
    let farmer_id: FarmerId = parse_path(farmer_id)?;
    Ok(state.verification.by_subject(&farmer_id).await)
}

/// GET /certifications/stats: certification rollup across all farmers.
#[utoipa::path(
    get,
    path = "/certifications/stats",
    responses(
        (status = 200, description = "Counts and farmers per bucket", body = CertificationStatistics),
        (status = 403, description = "Caller is not admin"),
    ),
    tag = "certifications"
)]
async fn statistics(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<CertificationStatistics>, AppError> {
    require_role(&caller, Role::Admin)?;
    Ok(Json(aggregate(&state.farmers.list())))
}

/// POST /certifications/by-id/{certificate_id}/revoke: revoke a certificate.
#[utoipa::path(
    post,
    path = "/certifications/by-id/{certificate_id}/revoke",
    params(("certificate_id" = String, Path, description = "Certificate identifier")),
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "confirmed or failed", body = WriteOutcome),
        (status = 202, description = "pending_confirmation", body = WriteOutcome),
        (status = 404, description = "Unknown certificate"),
        (status = 409, description = "Already revoked"),
        (status = 503, description = "Ledger unavailable"),
    ),
    tag = "certifications"
)]
async fn revoke(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(certificate_id): Path<String>,
    body: Result<Json<RevokeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    require_role(&caller, Role::Admin)?;
    let certificate_id: CertificateId = parse_path(certificate_id)?;
    let req = extract_validated_json(body)?;
    let outcome = state.orchestrator.revoke(&certificate_id, &req.reason).await?;
    Ok(write_response(outcome))
}

/// GET /certifications/transactions/{correlation_id}: transaction record.
#[utoipa::path(
    get,
    path = "/certifications/transactions/{correlation_id}",
    params(("correlation_id" = String, Path, description = "Correlation id returned by a write")),
    responses(
        (status = 200, description = "Transaction record"),
        (status = 404, description = "Unknown correlation id"),
    ),
    tag = "certifications"
)]
async fn transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(correlation_id): Path<String>,
) -> Result<Json<TransactionRecord>, AppError> {
    require_role(&caller, Role::Admin)?;
    state
        .orchestrator
        .transaction(&correlation_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("transaction {correlation_id} not found")))
}

/// POST /certifications/{farmer_id}/reconcile: settle an ambiguous issuance.
#[utoipa::path(
    post,
    path = "/certifications/{farmer_id}/reconcile",
    params(("farmer_id" = String, Path, description = "Farmer identifier")),
    responses(
        (status = 200, description = "Reconciliation result", body = ReconcileReport),
        (status = 404, description = "Unknown farmer"),
        (status = 503, description = "Ledger unavailable"),
    ),
    tag = "certifications"
)]
async fn reconcile(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(farmer_id): Path<String>,
) -> Result<Json<ReconcileReport>, AppError> {
    require_role(&caller, Role::Admin)?;
    let farmer_id: FarmerId = parse_path(farmer_id)?;
    Ok(Json(state.orchestrator.reconcile_farmer(&farmer_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::VerificationStatus;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn verifier() -> CallerIdentity {
        CallerIdentity {
            role: Role::Verifier,
            farmer_id: None,
        }
    }

    fn test_app() -> Router<()> {
        router()
            .layer(axum::Extension(CallerIdentity::admin()))
            .with_state(AppState::new())
    }

    fn test_app_with_identity(identity: CallerIdentity) -> Router<()> {
        router().layer(axum::Extension(identity)).with_state(AppState::new())
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: Response) -> T {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_certificate_is_404_not_found() {
        let resp = test_app_with_identity(verifier())
            .oneshot(
                Request::builder()
                    .uri("/certifications/by-id/CERT-UNKNOWN")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let report: VerificationReport = body_json(resp).await;
        assert_eq!(report.status, VerificationStatus::NotFound);
        assert_eq!(report.is_valid, Some(false));
        assert!(report.farmer_id.is_none());
    }

    #[tokio::test]
    async fn decide_requires_admin() {
        let resp = test_app_with_identity(verifier())
            .oneshot(post_json(
                "/certifications/F-42/decide",
                serde_json::json!({"decision": "approve"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn approve_without_documents_is_422() {
        let resp = test_app()
            .oneshot(post_json(
                "/certifications/F-42/decide",
                serde_json::json!({"decision": "approve"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = body_json(resp).await;
        assert_eq!(body["error"]["code"], "INCOMPLETE_DOCUMENTS");
    }

    #[tokio::test]
    async fn unknown_decision_is_bad_request() {
        let resp = test_app()
            .oneshot(post_json(
                "/certifications/F-42/decide",
                serde_json::json!({"decision": "maybe"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn revoke_unknown_certificate_is_404() {
        let resp = test_app()
            .oneshot(post_json(
                "/certifications/by-id/CERT-404/revoke",
                serde_json::json!({"reason": "document fraud"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn revoke_requires_reason() {
        let resp = test_app()
            .oneshot(post_json(
                "/certifications/by-id/CERT-1/revoke",
                serde_json::json!({"reason": " "}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let resp = test_app()
            .oneshot(
                Request::builder()
                    .uri("/certifications/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let stats: CertificationStatistics = body_json(resp).await;
        assert_eq!(stats.stats.total_farmers, 0);
    }

    #[tokio::test]
    async fn unknown_transaction_is_404() {
        let resp = test_app()
            .oneshot(
                Request::builder()
                    .uri("/certifications/transactions/CERT-404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
