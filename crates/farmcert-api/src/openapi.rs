//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into a single OpenAPI document,
//! served unauthenticated at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "`{role}:{subject}:{secret}` or `{secret}`. Secret set via AUTH_TOKEN.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI document for the whole service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "farmcert API",
        description = "Farmer certification: document intake, admin decisions, ledger-anchored certificate issuance and revocation, and verification queries.\n\nCertificates live only in the registry on the ledger. The registry stores SHA-256 commitments to the farmer's documents, never the documents.\n\nAuthentication: `Authorization: Bearer <token>`. Health probes, `/metrics` and `/openapi.json` are unauthenticated."
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        crate::routes::certifications::decide,
        crate::routes::certifications::verify_by_id,
        crate::routes::certifications::verify_by_subject,
        crate::routes::certifications::statistics,
        crate::routes::certifications::revoke,
        crate::routes::certifications::transaction,
        crate::routes::certifications::reconcile,
        crate::routes::farmers::put_document,
        crate::routes::farmers::get_farmer,
        crate::routes::admin::get_admin,
        crate::routes::admin::transfer,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::documents::DocumentType,
            crate::documents::DocumentRef,
            crate::documents::DocumentBundle,
            crate::state::FarmerStatus,
            crate::verification::VerificationStatus,
            crate::verification::VerificationReport,
            crate::orchestration::DecisionOutcome,
            crate::orchestration::WriteState,
            crate::orchestration::WriteOutcome,
            crate::orchestration::ReconcileReport,
            crate::statistics::StatusCounts,
            crate::statistics::FarmerSummary,
            crate::statistics::CertificationStatistics,
            crate::routes::certifications::Decision,
            crate::routes::certifications::DecideRequest,
            crate::routes::certifications::RevokeRequest,
            crate::routes::farmers::DocumentUploadRequest,
            crate::routes::farmers::FarmerView,
            crate::routes::admin::TransferRequest,
            crate::routes::admin::AdminView,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "certifications", description = "Decisions, revocation, reconciliation, verification and statistics"),
        (name = "farmers", description = "Document intake and application status"),
        (name = "admin", description = "Registry admin principal"),
    )
)]
pub struct ApiDoc;

/// Serves the document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_has_every_route() {
        let spec = ApiDoc::openapi();
        for path in [
            "/certifications/{farmer_id}/decide",
            "/certifications/{farmer_id}/reconcile",
            "/certifications/by-id/{certificate_id}",
            "/certifications/by-id/{certificate_id}/revoke",
            "/certifications/by-subject/{farmer_id}",
            "/certifications/stats",
            "/certifications/transactions/{correlation_id}",
            "/farmers/{farmer_id}",
            "/farmers/{farmer_id}/documents/{document_type}",
            "/admin",
            "/admin/transfer",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_serializes() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        assert!(json["components"]["schemas"]["VerificationReport"].is_object());
        assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
