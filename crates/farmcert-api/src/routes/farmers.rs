//! # Farmer Application Routes
//!
//! Document intake and application status. The document bytes live in the
//! blob store; these endpoints only record where they are.
//!
//! | Method | Path | Caller |
//! |--------|------|--------|
//! | PUT | `/farmers/:farmer_id/documents/:document_type` | admin or that farmer |
//! | GET | `/farmers/:farmer_id` | admin or that farmer |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use farmcert_core::FarmerId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{require_farmer_access, CallerIdentity};
use crate::documents::{DocumentBundle, DocumentRef, DocumentType};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_path, Validate};
use crate::state::{AppState, FarmerRecord, FarmerStatus, ReviewState};

/// Build the farmer router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/farmers/:farmer_id", get(get_farmer))
        .route("/farmers/:farmer_id/documents/:document_type", put(put_document))
}

// -- Request / Response types -------------------------------------------------

/// Register an uploaded document.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUploadRequest {
    /// Key of the blob in the document store.
    pub blob_ref: String,
    pub content_type: String,
    /// Defaults to the time of this request.
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Name to print on the certificate.
    #[serde(default)]
    pub farmer_name: Option<String>,
}

impl Validate for DocumentUploadRequest {
    fn validate(&self) -> Result<(), String> {
        if self.blob_ref.trim().is_empty() {
            return Err("blobRef must not be empty".into());
        }
        if self.blob_ref.len() > 1024 {
            return Err("blobRef must not exceed 1024 characters".into());
        }
        if self.content_type.trim().is_empty() {
            return Err("contentType must not be empty".into());
        }
        if let Some(name) = &self.farmer_name {
            if name.trim().is_empty() {
                return Err("farmerName must not be empty when provided".into());
            }
            if name.len() > 256 {
                return Err("farmerName must not exceed 256 characters".into());
            }
        }
        Ok(())
    }
}

/// A farmer's application as the API reports it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FarmerView {
    pub farmer_id: String,
    pub farmer_name: Option<String>,
    pub status: FarmerStatus,
    pub documents: DocumentBundle,
    /// Required documents not yet uploaded.
    pub missing_documents: Vec<DocumentType>,
    pub remarks: Option<String>,
    pub certificate_id: Option<String>,
    pub ledger_tx_ref: Option<String>,
    /// Correlation id of an issuance still awaiting the ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<FarmerRecord> for FarmerView {
    fn from(r: FarmerRecord) -> Self {
        Self {
            status: r.status(),
            missing_documents: r.documents.missing(),
            farmer_id: r.farmer_id.to_string(),
            farmer_name: r.farmer_name,
            documents: r.documents,
            remarks: r.remarks,
            certificate_id: r.certificate_id.map(|c| c.to_string()),
            ledger_tx_ref: r.ledger_tx_ref.map(|t| t.to_string()),
            pending_correlation_id: r.in_flight.map(|f| f.correlation_id),
            last_error: r.last_error,
            updated_at: r.updated_at,
        }
    }
}

// -- Handlers -----------------------------------------------------------------

/// PUT /farmers/{farmer_id}/documents/{document_type}: record an upload.
///
/// Replacing a document sends a complete application back for review. A
/// certified farmer, or one with an issuance in flight, cannot change
/// documents.
#[utoipa::path(
    put,
    path = "/farmers/{farmer_id}/documents/{document_type}",
    params(
        ("farmer_id" = String, Path, description = "Farmer identifier"),
        ("document_type" = DocumentType, Path, description = "identity or eligibility_certificate"),
    ),
    request_body = DocumentUploadRequest,
    responses(
        (status = 200, description = "Document recorded", body = FarmerView),
        (status = 403, description = "Caller may not act for this farmer"),
        (status = 409, description = "Farmer is certified or an issuance is in flight"),
        (status = 422, description = "Invalid identifier or body"),
    ),
    tag = "farmers"
)]
async fn put_document(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path((farmer_id, document_type)): Path<(String, String)>,
    body: Result<Json<DocumentUploadRequest>, JsonRejection>,
) -> Result<Json<FarmerView>, AppError> {
    let farmer_id: FarmerId = parse_path(farmer_id)?;
    require_farmer_access(&caller, &farmer_id)?;
    let document_type: DocumentType = document_type.parse().map_err(AppError::Validation)?;
    let req = extract_validated_json(body)?;

    let _lock = state.orchestrator.guard().lock(&farmer_id).await;
    if let Some(existing) = state.farmers.get(&farmer_id) {
        if existing.in_flight.is_some() {
            return Err(AppError::Conflict(format!(
                "an issuance for farmer {farmer_id} is awaiting ledger confirmation"
            )));
        }
        if existing.status() == FarmerStatus::Certified {
            return Err(AppError::Conflict(format!(
                "farmer {farmer_id} is certified; documents cannot change"
            )));
        }
    }

    let now = state.clock.now().as_datetime().to_owned();
    let doc = DocumentRef {
        blob_ref: req.blob_ref.trim().to_string(),
        content_type: req.content_type.trim().to_string(),
        uploaded_at: req.uploaded_at.unwrap_or(now),
    };
    let record = state
        .farmers
        .upsert(&farmer_id, |r| {
            r.documents.insert(document_type, doc);
            if let Some(name) = &req.farmer_name {
                r.farmer_name = Some(name.trim().to_string());
            }
            if r.review != ReviewState::Unreviewed {
                r.review = ReviewState::Unreviewed;
            }
        })
        .await;

    tracing::info!(%farmer_id, %document_type, status = %record.status(), "document recorded");
    Ok(Json(record.into()))
}

/// GET /farmers/{farmer_id}: application status.
#[utoipa::path(
    get,
    path = "/farmers/{farmer_id}",
    params(("farmer_id" = String, Path, description = "Farmer identifier")),
    responses(
        (status = 200, description = "Farmer application", body = FarmerView),
        (status = 403, description = "Caller may not act for this farmer"),
        (status = 404, description = "No application for this farmer"),
    ),
    tag = "farmers"
)]
async fn get_farmer(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(farmer_id): Path<String>,
) -> Result<Json<FarmerView>, AppError> {
    let farmer_id: FarmerId = parse_path(farmer_id)?;
    require_farmer_access(&caller, &farmer_id)?;
    state
        .farmers
        .get(&farmer_id)
        .map(|r| Json(r.into()))
        .ok_or_else(|| AppError::NotFound(format!("farmer {farmer_id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn farmer(id: &str) -> CallerIdentity {
        CallerIdentity {
            role: Role::Farmer,
            farmer_id: Some(FarmerId::new(id).unwrap()),
        }
    }

    fn test_app_with_identity(state: AppState, identity: CallerIdentity) -> Router<()> {
        router().layer(axum::Extension(identity)).with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn farmer_uploads_own_documents() {
        let state = AppState::new();
        let app = test_app_with_identity(state.clone(), farmer("F-42"));

        let resp = app
            .clone()
            .oneshot(upload(
                "/farmers/F-42/documents/identity",
                serde_json::json!({"blobRef": "F-42/id.pdf", "contentType": "application/pdf", "farmerName": "A. Farmer"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let view: FarmerView = body_json(resp).await;
        assert_eq!(view.status, FarmerStatus::Partial);
        assert_eq!(view.missing_documents, vec![DocumentType::EligibilityCertificate]);
        assert_eq!(view.farmer_name.as_deref(), Some("A. Farmer"));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/farmers/F-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let view: FarmerView = body_json(resp).await;
        assert_eq!(view.documents.get(DocumentType::Identity).unwrap().blob_ref, "F-42/id.pdf");
    }

    #[tokio::test]
    async fn farmer_cannot_touch_another_farmer() {
        let app = test_app_with_identity(AppState::new(), farmer("F-7"));
        let resp = app
            .oneshot(upload(
                "/farmers/F-42/documents/identity",
                serde_json::json!({"blobRef": "x", "contentType": "application/pdf"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_document_type_is_rejected() {
        let app = test_app_with_identity(AppState::new(), CallerIdentity::admin());
        let resp = app
            .oneshot(upload(
                "/farmers/F-42/documents/passport",
                serde_json::json!({"blobRef": "x", "contentType": "application/pdf"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn empty_blob_ref_is_rejected() {
        let app = test_app_with_identity(AppState::new(), CallerIdentity::admin());
        let resp = app
            .oneshot(upload(
                "/farmers/F-42/documents/identity",
                serde_json::json!({"blobRef": "  ", "contentType": "application/pdf"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_farmer_is_404() {
        let app = test_app_with_identity(AppState::new(), CallerIdentity::admin());
        let resp = app
            .oneshot(Request::builder().uri("/farmers/F-404").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reupload_after_rejection_returns_to_review() {
        let state = AppState::new();
        let id = FarmerId::new("F-42").unwrap();
        state
            .farmers
            .upsert(&id, |r| {
                for t in DocumentType::REQUIRED {
                    r.documents.insert(
                        t,
                        DocumentRef {
                            blob_ref: format!("F-42/{t}"),
                            content_type: "application/pdf".into(),
                            uploaded_at: Utc::now(),
                        },
                    );
                }
                r.review = ReviewState::Rejected;
            })
            .await;

        let app = test_app_with_identity(state, farmer("F-42"));
        let resp = app
            .oneshot(upload(
                "/farmers/F-42/documents/eligibility_certificate",
                serde_json::json!({"blobRef": "F-42/elig-v2.pdf", "contentType": "application/pdf"}),
            ))
            .await
            .unwrap();
        let view: FarmerView = body_json(resp).await;
        assert_eq!(view.status, FarmerStatus::Pending);
    }
}
