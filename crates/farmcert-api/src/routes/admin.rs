//! # Registry Admin Routes
//!
//! The registry has exactly one admin principal. These endpoints show who it
//! is and hand the role over; the hand-over is itself a ledger write.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use farmcert_core::PrincipalId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::orchestration::{WriteOutcome, WriteState};
use crate::state::AppState;

/// Build the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(get_admin))
        .route("/admin/transfer", post(transfer))
}

/// Transfer the registry admin role.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub new_admin: String,
}

impl Validate for TransferRequest {
    fn validate(&self) -> Result<(), String> {
        PrincipalId::new(self.new_admin.trim())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Current registry admin and the identity this service signs with.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminView {
    pub registry_admin: String,
    pub service_signer: String,
    /// Whether this service can currently write to the registry.
    pub can_write: bool,
}

/// GET /admin: registry admin status.
#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Registry admin", body = AdminView),
        (status = 503, description = "Ledger unavailable"),
    ),
    tag = "admin"
)]
async fn get_admin(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<AdminView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let registry_admin = state.ledger.admin().await?;
    let service_signer = state.orchestrator.signer();
    Ok(Json(AdminView {
        can_write: registry_admin == service_signer,
        registry_admin: registry_admin.to_string(),
        service_signer: service_signer.to_string(),
    }))
}

/// POST /admin/transfer: hand the registry admin role to another principal.
#[utoipa::path(
    post,
    path = "/admin/transfer",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "confirmed or failed", body = WriteOutcome),
        (status = 202, description = "pending_confirmation", body = WriteOutcome),
        (status = 403, description = "Service signer is not the registry admin"),
        (status = 422, description = "Invalid principal, or already admin"),
        (status = 503, description = "Ledger unavailable"),
    ),
    tag = "admin"
)]
async fn transfer(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let new_admin = PrincipalId::new(req.new_admin.trim())?;

    let outcome = state.orchestrator.transfer_admin(&new_admin).await?;
    let status = if outcome.state == WriteState::PendingConfirmation {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}
