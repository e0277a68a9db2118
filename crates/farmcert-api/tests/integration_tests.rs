//! End-to-end tests of the assembled application router.
//!
//! Every request goes through `farmcert_api::app`, so authentication, the
//! metrics layer and the real route table are all in play. The ledger is the
//! in-process one on a manual clock so expiry can be crossed without waiting.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use farmcert_api::config::AppConfig;
use farmcert_api::documents::InMemoryDocumentStore;
use farmcert_api::orchestration::{ReconcileReport, WriteOutcome, WriteState};
use farmcert_api::state::{AppComponents, AppState, FarmerStatus};
use farmcert_api::statistics::CertificationStatistics;
use farmcert_api::verification::{VerificationReport, VerificationStatus};
use farmcert_core::{CertificateId, Clock, ManualClock, Timestamp};
use farmcert_ledger::{InMemoryLedger, InMemoryLedgerConfig, InMemoryTransactionStore, PollPolicy, Stall};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "s3cret";

struct TestApp {
    state: AppState,
    ledger: Arc<InMemoryLedger>,
    documents: InMemoryDocumentStore,
    clock: ManualClock,
}

impl TestApp {
    fn new(auth_token: Option<&str>) -> Self {
        let clock = ManualClock::new(Timestamp::from_unix_secs(1_700_000_000).unwrap());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let config = AppConfig {
            auth_token: auth_token.map(str::to_string),
            poll: PollPolicy {
                initial_interval: Duration::from_millis(5),
                max_interval: Duration::from_millis(10),
                max_attempts: 4,
                timeout: Duration::from_secs(2),
            },
            decision_wait: Duration::from_secs(2),
            ..AppConfig::default()
        };
        let ledger = Arc::new(InMemoryLedger::new(
            config.admin_id.clone(),
            config.registry,
            InMemoryLedgerConfig { confirmation_polls: 1 },
            Arc::clone(&shared_clock),
        ));
        let documents = InMemoryDocumentStore::new();
        let state = AppState::from_components(
            config,
            AppComponents {
                ledger: ledger.clone(),
                tx_store: Arc::new(InMemoryTransactionStore::new()),
                documents: Arc::new(documents.clone()),
                clock: shared_clock,
                db_pool: None,
            },
        );
        Self {
            state,
            ledger,
            documents,
            clock,
        }
    }

    fn app(&self) -> Router {
        farmcert_api::app(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn send_json(&self, method: &str, uri: &str, body: Value) -> axum::response::Response {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Store the blob and register its reference for the farmer.
    async fn upload(&self, farmer_id: &str, doc_type: &str, bytes: &[u8]) -> axum::response::Response {
        let blob_ref = format!("{farmer_id}/{doc_type}");
        self.documents.put(blob_ref.clone(), bytes.to_vec());
        self.send_json(
            "PUT",
            &format!("/farmers/{farmer_id}/documents/{doc_type}"),
            json!({
                "blobRef": blob_ref,
                "contentType": "application/pdf",
                "farmerName": "A. Farmer",
            }),
        )
        .await
    }

    async fn upload_both(&self, farmer_id: &str) {
        assert_eq!(self.upload(farmer_id, "identity", b"identity").await.status(), StatusCode::OK);
        assert_eq!(
            self.upload(farmer_id, "eligibility_certificate", b"eligibility").await.status(),
            StatusCode::OK
        );
    }

    async fn approve(&self, farmer_id: &str, certificate_id: &str) -> axum::response::Response {
        self.send_json(
            "POST",
            &format!("/certifications/{farmer_id}/decide"),
            json!({ "decision": "approve", "certificateId": certificate_id }),
        )
        .await
    }
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn authed(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

// -- Health and Observability -------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let t = TestApp::new(None);
    let resp = t.get("/health/liveness").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let t = TestApp::new(None);
    let resp = t.get("/health/readiness").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ready");
}

#[tokio::test]
async fn test_readiness_reports_ledger_outage() {
    let t = TestApp::new(None);
    t.ledger.set_unavailable(true);
    let resp = t.get("/health/readiness").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(resp).await, "ledger unreachable");
}

#[tokio::test]
async fn test_probes_skip_authentication() {
    let t = TestApp::new(Some(SECRET));
    assert_eq!(t.get("/health/liveness").await.status(), StatusCode::OK);
    assert_eq!(t.get("/openapi.json").await.status(), StatusCode::OK);
    assert_eq!(t.get("/metrics").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_expose_farmer_buckets() {
    let t = TestApp::new(None);
    t.upload("F-7", "identity", b"identity").await;
    // Drive one request through the counted router.
    t.get("/farmers/F-7").await;

    let body = body_string(t.get("/metrics").await).await;
    assert!(body.contains("farmcert_http_requests_total"));
    assert!(body.contains(r#"farmcert_farmers{bucket="partial"} 1"#));
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let t = TestApp::new(Some(SECRET));
    let resp = t.get("/certifications/by-id/CERT-1").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let t = TestApp::new(Some(SECRET));
    let resp = t.send(authed("/certifications/by-id/CERT-1", "nope")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_verifier_can_query_but_not_decide() {
    let t = TestApp::new(Some(SECRET));
    let token = format!("verifier::{SECRET}");

    let resp = t.send(authed("/certifications/by-id/CERT-1", &token)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = t.send(authed("/certifications/stats", &token)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_farmer_token_is_scoped_to_own_record() {
    let t = TestApp::new(Some(SECRET));
    t.documents.put("F-42/identity", b"identity".to_vec());
    let upload = |farmer: &str| {
        Request::builder()
            .method("PUT")
            .uri(format!("/farmers/{farmer}/documents/identity"))
            .header("authorization", format!("Bearer farmer:F-42:{SECRET}"))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "blobRef": "F-42/identity", "contentType": "application/pdf" }).to_string(),
            ))
            .unwrap()
    };

    assert_eq!(t.send(upload("F-42")).await.status(), StatusCode::OK);
    assert_eq!(t.send(upload("F-43")).await.status(), StatusCode::FORBIDDEN);
}

// -- Certification Lifecycle --------------------------------------------------

#[tokio::test]
async fn test_incomplete_application_is_not_submitted() {
    let t = TestApp::new(None);
    t.upload("F-42", "identity", b"identity").await;

    let resp = t.approve("F-42", "CERT-1001").await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"]["code"], "INCOMPLETE_DOCUMENTS");
    assert_eq!(t.ledger.submission_count(), 0);
}

#[tokio::test]
async fn test_approve_then_verify_until_expiry() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;

    let resp = t.approve("F-42", "CERT-1001").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome: Value = body_json(resp).await;
    assert_eq!(outcome["outcome"], "certified");
    assert_eq!(outcome["certificate_id"], "CERT-1001");
    assert_eq!(outcome["already_certified"], false);

    let resp = t.get("/certifications/by-id/CERT-1001").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: VerificationReport = body_json(resp).await;
    assert_eq!(report.status, VerificationStatus::Valid);
    assert_eq!(report.is_valid, Some(true));
    assert_eq!(report.farmer_id.unwrap().as_str(), "F-42");
    let issued_at = report.issued_at.unwrap();
    assert_eq!(report.expires_at, Some(issued_at.plus_days(365)));

    let farmer: Value = body_json(t.get("/farmers/F-42").await).await;
    assert_eq!(farmer["status"], "certified");
    assert_eq!(farmer["certificate_id"], "CERT-1001");

    t.clock.advance(chrono::Duration::days(365));
    let report: VerificationReport = body_json(t.get("/certifications/by-id/CERT-1001").await).await;
    assert_eq!(report.status, VerificationStatus::Expired);
    assert_eq!(report.is_valid, Some(false));
}

#[tokio::test]
async fn test_documents_hashed_into_certificate() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;
    t.approve("F-42", "CERT-1001").await;

    let id = CertificateId::new("CERT-1001").unwrap();
    let (identity, eligibility) = t.ledger.with_registry(|r| {
        let cert = r.get(&id).unwrap();
        (cert.identity_hash, cert.eligibility_hash)
    });
    assert_eq!(identity, farmcert_core::sha256_digest(b"identity"));
    assert_eq!(eligibility, farmcert_core::sha256_digest(b"eligibility"));
}

#[tokio::test]
async fn test_verify_by_subject_finds_latest() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;
    t.approve("F-42", "CERT-1001").await;

    let report: VerificationReport = body_json(t.get("/certifications/by-subject/F-42").await).await;
    assert_eq!(report.status, VerificationStatus::Valid);
    assert_eq!(report.certificate_id.unwrap().as_str(), "CERT-1001");

    let resp = t.get("/certifications/by-subject/F-99").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_revoke_is_final() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;
    t.approve("F-42", "CERT-1001").await;

    let resp = t
        .send_json(
            "POST",
            "/certifications/by-id/CERT-1001/revoke",
            json!({ "reason": "document fraud" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome: WriteOutcome = body_json(resp).await;
    assert_eq!(outcome.state, WriteState::Confirmed);

    let report: VerificationReport = body_json(t.get("/certifications/by-id/CERT-1001").await).await;
    assert_eq!(report.status, VerificationStatus::Revoked);
    assert_eq!(report.is_valid, Some(false));
    assert_eq!(report.revocation_reason.as_deref(), Some("document fraud"));

    let resp = t
        .send_json(
            "POST",
            "/certifications/by-id/CERT-1001/revoke",
            json!({ "reason": "again" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let id = CertificateId::new("CERT-1001").unwrap();
    let stored = t
        .ledger
        .with_registry(|r| r.get(&id).and_then(|c| c.revocation_reason.clone()));
    assert_eq!(stored.as_deref(), Some("document fraud"));
}

#[tokio::test]
async fn test_unknown_certificate_is_not_found() {
    let t = TestApp::new(None);
    let resp = t.get("/certifications/by-id/CERT-UNKNOWN").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let report: VerificationReport = body_json(resp).await;
    assert_eq!(report.status, VerificationStatus::NotFound);
    assert_eq!(report.is_valid, Some(false));
}

#[tokio::test]
async fn test_ledger_outage_is_not_reported_invalid() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;
    t.approve("F-42", "CERT-1001").await;
    t.ledger.set_unavailable(true);

    let resp = t.get("/certifications/by-id/CERT-1001").await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let report: VerificationReport = body_json(resp).await;
    assert_eq!(report.status, VerificationStatus::LedgerUnavailable);
    assert_eq!(report.is_valid, None);
}

#[tokio::test]
async fn test_rejection_then_reupload() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;

    let resp = t
        .send_json(
            "POST",
            "/certifications/F-42/decide",
            json!({ "decision": "reject", "remarks": "blurry scan" }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome: Value = body_json(resp).await;
    assert_eq!(outcome["outcome"], "rejected");
    assert_eq!(t.ledger.submission_count(), 0);

    let farmer: Value = body_json(t.get("/farmers/F-42").await).await;
    assert_eq!(farmer["status"], "rejected");
    assert_eq!(farmer["remarks"], "blurry scan");

    t.upload("F-42", "identity", b"identity, rescanned").await;
    let farmer: Value = body_json(t.get("/farmers/F-42").await).await;
    assert_eq!(farmer["status"], "pending");
}

#[tokio::test]
async fn test_certified_farmer_cannot_replace_documents() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;
    t.approve("F-42", "CERT-1001").await;

    let resp = t.upload("F-42", "identity", b"other identity").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_lost_receipt_is_reconciled() {
    let t = TestApp::new(None);
    t.upload_both("F-42").await;
    t.ledger.set_stall(Stall::ApplyHidden);

    let resp = t.approve("F-42", "CERT-1001").await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let outcome: Value = body_json(resp).await;
    assert_eq!(outcome["outcome"], "pending_confirmation");
    let correlation_id = outcome["correlation_id"].as_str().unwrap().to_string();

    let resp = t.get(&format!("/certifications/transactions/{correlation_id}")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    t.ledger.set_stall(Stall::Off);
    let resp = t
        .send(
            Request::builder()
                .method("POST")
                .uri("/certifications/F-42/reconcile")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: ReconcileReport = body_json(resp).await;
    assert_eq!(report.outcome, "landed");
    assert_eq!(report.status, FarmerStatus::Certified);
    assert_eq!(t.ledger.submission_count(), 1);
}

// -- Statistics ---------------------------------------------------------------

#[tokio::test]
async fn test_statistics_buckets() {
    let t = TestApp::new(None);
    t.upload_both("F-1").await;
    t.approve("F-1", "CERT-1").await;
    t.upload("F-2", "identity", b"identity").await;
    t.upload_both("F-3").await;

    let resp = t.get("/certifications/stats").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stats: CertificationStatistics = body_json(resp).await;
    assert_eq!(stats.stats.total_farmers, 3);
    assert_eq!(stats.stats.certified, 1);
    assert_eq!(stats.stats.partial, 1);
    assert_eq!(stats.stats.pending, 1);
    assert_eq!(stats.stats.rejected, 0);
    assert_eq!(stats.farmers["certified"][0].farmer_id, "F-1");
    assert_eq!(
        stats.farmers["certified"][0].certificate_id.as_deref(),
        Some("CERT-1")
    );
}

// -- Registry Admin -----------------------------------------------------------

#[tokio::test]
async fn test_admin_transfer_hands_over_writes() {
    let t = TestApp::new(None);
    let resp = t
        .send_json("POST", "/admin/transfer", json!({ "newAdmin": "ops" }))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome: WriteOutcome = body_json(resp).await;
    assert_eq!(outcome.state, WriteState::Confirmed);

    let view: Value = body_json(t.get("/admin").await).await;
    assert_eq!(view["registry_admin"], "ops");
    assert_eq!(view["service_signer"], "ops");
    assert_eq!(view["can_write"], true);
}
