//! # Issuance Orchestration
//!
//! Turns admin decisions into registry writes and folds ledger outcomes back
//! into farmer records.
//!
//! ## Approval Pipeline
//!
//! 1. **Fail fast** on an incomplete document bundle. Nothing is fetched,
//!    hashed or submitted.
//! 2. **Commit** to both documents: fetch the bytes and take SHA-256 digests.
//! 3. **Guard**: under the per-farmer lock, settle any earlier in-flight
//!    issuance and short-circuit if the farmer already holds a live
//!    certificate.
//! 4. **Submit** the `issue` write and wait up to the configured decision
//!    window.
//! 5. **Fold back** the outcome. A background task applies it again when
//!    the write resolves after the caller stopped waiting.
//!
//! ## Outcomes
//!
//! The admin always gets one of four answers: `certified`,
//! `pending_confirmation`, `failed` (ledger revert, reason verbatim), or
//! `rejected`. A permanent revert leaves the farmer in its prior review
//! state with the reason in `last_error`; a new decision is required.

use std::sync::Arc;
use std::time::Duration;

use farmcert_core::{sha256_digest, CertificateId, Clock, FarmerId, PrincipalId};
use farmcert_ledger::{
    Ledger, LedgerError, LedgerOp, StoreError, SubmissionHandle, SubmitError, TransactionFailure,
    TransactionRecord, TransactionState, TransactionSubmitter,
};
use farmcert_registry::{CertificateStatus, IssueRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::documents::{DocumentStore, DocumentStoreError, DocumentType};
use crate::middleware::metrics::ApiMetrics;
use crate::reconciliation::{ReconcileOutcome, ReconciliationGuard};
use crate::state::{FarmerRecord, FarmerStatus, Farmers, InFlightIssuance, ReviewState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an orchestration request could not proceed.
///
/// Ledger reverts are not errors: they are reported as `failed` outcomes.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// Approval requested before both documents were uploaded.
    #[error("incomplete documents: missing {missing:?}")]
    IncompleteDocuments { missing: Vec<DocumentType> },

    /// A referenced document could not be read from the document store.
    #[error("cannot read {doc_type} document: {source}")]
    Document {
        doc_type: DocumentType,
        #[source]
        source: DocumentStoreError,
    },

    /// The ledger could not be read.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The transaction record could not be persisted.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// The transaction store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    /// The service's signing identity is not the registry admin.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// An admin's decision on a farmer's application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminDecision {
    Approve {
        /// Overrides the name recorded at upload.
        farmer_name: Option<String>,
        /// Caller-chosen certificate id; generated when absent.
        certificate_id: Option<CertificateId>,
        remarks: Option<String>,
    },
    Reject {
        remarks: Option<String>,
    },
}

/// What the admin is told after a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// The farmer holds a confirmed, valid certificate.
    Certified {
        farmer_id: String,
        certificate_id: String,
        ledger_tx_ref: Option<String>,
        /// No write was made; the certificate already existed.
        already_certified: bool,
    },
    /// Submitted, outcome not known yet.
    PendingConfirmation {
        farmer_id: String,
        certificate_id: String,
        correlation_id: String,
        reason: String,
    },
    /// The registry reverted the write.
    Failed {
        farmer_id: String,
        certificate_id: String,
        code: String,
        reason: String,
    },
    /// Application rejected. No ledger interaction.
    Rejected {
        farmer_id: String,
        remarks: Option<String>,
    },
}

impl DecisionOutcome {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certified { .. } => "certified",
            Self::PendingConfirmation { .. } => "pending_confirmation",
            Self::Failed { .. } => "failed",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Outcome class of a revoke or admin-transfer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WriteState {
    Confirmed,
    PendingConfirmation,
    Failed,
}

/// Response to a revoke or admin-transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WriteOutcome {
    pub state: WriteState,
    pub correlation_id: String,
    pub ledger_tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&TransactionRecord> for WriteOutcome {
    fn from(record: &TransactionRecord) -> Self {
        let (state, code, reason) = match (&record.state, &record.failure) {
            (TransactionState::Confirmed, _) => (WriteState::Confirmed, None, None),
            (TransactionState::Failed, Some(TransactionFailure::Reverted { code, message })) => {
                (WriteState::Failed, Some(code.clone()), Some(message.clone()))
            }
            (TransactionState::Failed, _) => (
                WriteState::PendingConfirmation,
                None,
                Some(PENDING_RECONCILIATION.to_string()),
            ),
            _ => (
                WriteState::PendingConfirmation,
                None,
                Some(AWAITING_CONFIRMATION.to_string()),
            ),
        };
        Self {
            state,
            correlation_id: record.correlation_id.clone(),
            ledger_tx_ref: record.ledger_tx_ref.as_ref().map(|t| t.to_string()),
            code,
            reason,
        }
    }
}

/// Result of an explicit reconciliation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReconcileReport {
    pub farmer_id: String,
    /// `landed`, `not_landed`, `in_flight`, `settled` or `nothing_to_reconcile`.
    pub outcome: String,
    pub correlation_id: Option<String>,
    pub status: FarmerStatus,
    pub certificate_id: Option<String>,
}

const AWAITING_CONFIRMATION: &str = "submitted; awaiting ledger confirmation";
const PENDING_RECONCILIATION: &str =
    "ledger did not confirm in time; outcome unknown, pending reconciliation";

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives certification decisions, revocations and admin transfers.
#[derive(Debug, Clone)]
pub struct IssuanceOrchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    farmers: Farmers,
    documents: Arc<dyn DocumentStore>,
    submitter: TransactionSubmitter,
    guard: ReconciliationGuard,
    /// Identity registry writes are signed with. Follows confirmed admin transfers.
    signer: RwLock<PrincipalId>,
    decision_wait: Duration,
    metrics: ApiMetrics,
    clock: Arc<dyn Clock>,
}

impl IssuanceOrchestrator {
    pub fn new(
        farmers: Farmers,
        documents: Arc<dyn DocumentStore>,
        submitter: TransactionSubmitter,
        signer: PrincipalId,
        decision_wait: Duration,
        metrics: ApiMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = ReconciliationGuard::new(
            Arc::clone(submitter.ledger()),
            Arc::clone(submitter.store()),
            Arc::clone(&clock),
        );
        Self {
            inner: Arc::new(Inner {
                farmers,
                documents,
                submitter,
                guard,
                signer: RwLock::new(signer),
                decision_wait,
                metrics,
                clock,
            }),
        }
    }

    /// Current signing identity.
    pub fn signer(&self) -> PrincipalId {
        self.inner.signer.read().clone()
    }

    pub fn guard(&self) -> &ReconciliationGuard {
        &self.inner.guard
    }

    fn ledger(&self) -> &Arc<dyn Ledger> {
        self.inner.submitter.ledger()
    }

    /// Apply an admin decision.
    pub async fn decide(
        &self,
        farmer_id: &FarmerId,
        decision: AdminDecision,
    ) -> Result<DecisionOutcome, OrchestrationError> {
        let outcome = match decision {
            AdminDecision::Approve {
                farmer_name,
                certificate_id,
                remarks,
            } => self.approve(farmer_id, farmer_name, certificate_id, remarks).await?,
            AdminDecision::Reject { remarks } => self.reject(farmer_id, remarks).await?,
        };
        self.inner.metrics.record_decision(outcome.as_str());
        tracing::info!(%farmer_id, outcome = outcome.as_str(), "certification decision");
        Ok(outcome)
    }

    async fn reject(
        &self,
        farmer_id: &FarmerId,
        remarks: Option<String>,
    ) -> Result<DecisionOutcome, OrchestrationError> {
        let _lock = self.inner.guard.lock(farmer_id).await;
        let record = self.farmer(farmer_id)?;
        if record.in_flight.is_some() {
            return Err(OrchestrationError::Conflict(format!(
                "an issuance for farmer {farmer_id} is awaiting ledger confirmation"
            )));
        }
        if record.status() == FarmerStatus::Certified {
            return Err(OrchestrationError::Conflict(format!(
                "farmer {farmer_id} is certified; revoke the certificate first"
            )));
        }

        self.inner
            .farmers
            .update(farmer_id, |r| {
                r.review = ReviewState::Rejected;
                r.remarks = remarks.clone();
            })
            .await;
        Ok(DecisionOutcome::Rejected {
            farmer_id: farmer_id.to_string(),
            remarks,
        })
    }

    async fn approve(
        &self,
        farmer_id: &FarmerId,
        farmer_name: Option<String>,
        certificate_id: Option<CertificateId>,
        remarks: Option<String>,
    ) -> Result<DecisionOutcome, OrchestrationError> {
        let record = self.inner.farmers.get(farmer_id);
        let missing = record
            .as_ref()
            .map(|r| r.documents.missing())
            .unwrap_or_else(|| DocumentType::REQUIRED.to_vec());
        if !missing.is_empty() {
            return Err(OrchestrationError::IncompleteDocuments { missing });
        }
        let record = self.farmer(farmer_id)?;

        let farmer_name = farmer_name
            .or_else(|| record.farmer_name.clone())
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OrchestrationError::Validation("farmer name is required".into()))?;

        let identity_hash = self.digest(&record, DocumentType::Identity).await?;
        let eligibility_hash = self.digest(&record, DocumentType::EligibilityCertificate).await?;

        let _lock = self.inner.guard.lock(farmer_id).await;

        if let Some(outcome) = self.settle_in_flight(farmer_id).await? {
            return Ok(outcome);
        }

        if let Some(cert) = self.inner.guard.live_certificate(farmer_id).await? {
            let record = self
                .inner
                .farmers
                .update(farmer_id, |r| {
                    r.review = ReviewState::Certified;
                    if r.certificate_id.as_ref() != Some(&cert.certificate_id) {
                        r.certificate_id = Some(cert.certificate_id.clone());
                        r.ledger_tx_ref = None;
                    }
                })
                .await;
            return Ok(DecisionOutcome::Certified {
                farmer_id: farmer_id.to_string(),
                certificate_id: cert.certificate_id.to_string(),
                ledger_tx_ref: record.and_then(|r| r.ledger_tx_ref).map(|t| t.to_string()),
                already_certified: true,
            });
        }

        let signer = self.authorized_signer().await?;
        let now = self.inner.clock.now();
        let certificate_id = certificate_id.unwrap_or_else(|| CertificateId::generate(farmer_id, &now));
        let op = LedgerOp::Issue(IssueRequest {
            certificate_id: certificate_id.clone(),
            farmer_id: farmer_id.clone(),
            farmer_name: farmer_name.clone(),
            identity_hash,
            eligibility_hash,
        });
        let correlation_id = op.correlation_id(&now);
        if let Some(existing) = self.inner.submitter.store().get(&correlation_id).await? {
            if !replaceable_issuance(&existing, farmer_id) {
                return Err(OrchestrationError::Conflict(format!(
                    "certificate id {certificate_id} is already used by another registry write"
                )));
            }
        }

        let prior_review = match record.review {
            ReviewState::Certified => ReviewState::Verified,
            other => other,
        };
        self.inner
            .farmers
            .update(farmer_id, |r| {
                r.review = ReviewState::Verified;
                r.farmer_name = Some(farmer_name.clone());
                if remarks.is_some() {
                    r.remarks = remarks.clone();
                }
                r.last_error = None;
                r.in_flight = Some(InFlightIssuance {
                    correlation_id: correlation_id.clone(),
                    certificate_id: certificate_id.clone(),
                    prior_review,
                });
            })
            .await;

        let handle = self.inner.submitter.submit(correlation_id, op, &signer).await?;
        let record = self.await_decision(handle).await;
        Ok(issuance_outcome(farmer_id, &certificate_id, &record))
    }

    /// Settle an earlier issuance still attached to the farmer. Returns an
    /// outcome when the caller must not submit again.
    async fn settle_in_flight(&self, farmer_id: &FarmerId) -> Result<Option<DecisionOutcome>, OrchestrationError> {
        let Some(in_flight) = self.inner.farmers.get(farmer_id).and_then(|r| r.in_flight) else {
            return Ok(None);
        };

        let stored = self
            .inner
            .submitter
            .store()
            .get(&in_flight.correlation_id)
            .await?;
        let Some(stored) = stored else {
            tracing::warn!(%farmer_id, correlation_id = %in_flight.correlation_id, "in-flight issuance has no transaction record");
            self.inner.farmers.update(farmer_id, |r| r.in_flight = None).await;
            return Ok(None);
        };

        if !stored.is_resolved() {
            return Ok(Some(issuance_outcome(farmer_id, &in_flight.certificate_id, &stored)));
        }

        let outcome = self.inner.guard.reconcile_record(stored).await?;
        self.apply_record(outcome.record()).await;
        match outcome {
            ReconcileOutcome::Landed(r) => Ok(Some(issuance_outcome(farmer_id, &in_flight.certificate_id, &r))),
            ReconcileOutcome::InFlight(r) => {
                Ok(Some(issuance_outcome(farmer_id, &in_flight.certificate_id, &r)))
            }
            ReconcileOutcome::NotLanded(_) | ReconcileOutcome::Settled(_) => Ok(None),
        }
    }

    /// Revoke a certificate.
    pub async fn revoke(
        &self,
        certificate_id: &CertificateId,
        reason: &str,
    ) -> Result<WriteOutcome, OrchestrationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OrchestrationError::Validation("revocation reason is required".into()));
        }
        let cert = self
            .ledger()
            .certificate(certificate_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound(format!("certificate {certificate_id} not found")))?;
        if cert.status == CertificateStatus::Revoked {
            return Err(OrchestrationError::Conflict(format!(
                "certificate {certificate_id} is already revoked"
            )));
        }

        let signer = self.authorized_signer().await?;
        let op = LedgerOp::Revoke {
            certificate_id: certificate_id.clone(),
            reason: reason.to_string(),
        };
        let correlation_id = op.correlation_id(&self.inner.clock.now());
        let handle = self.inner.submitter.submit(correlation_id, op, &signer).await?;
        let record = self.await_decision(handle).await;
        Ok(WriteOutcome::from(&record))
    }

    /// Hand the registry admin role to `new_admin`.
    pub async fn transfer_admin(&self, new_admin: &PrincipalId) -> Result<WriteOutcome, OrchestrationError> {
        let signer = self.authorized_signer().await?;
        if &signer == new_admin {
            return Err(OrchestrationError::Validation(format!(
                "{new_admin} is already the registry admin"
            )));
        }
        let op = LedgerOp::TransferAdmin {
            new_admin: new_admin.clone(),
        };
        let correlation_id = op.correlation_id(&self.inner.clock.now());
        let handle = self.inner.submitter.submit(correlation_id, op, &signer).await?;
        let record = self.await_decision(handle).await;
        Ok(WriteOutcome::from(&record))
    }

    /// Look up a transaction record.
    pub async fn transaction(&self, correlation_id: &str) -> Result<Option<TransactionRecord>, OrchestrationError> {
        Ok(self.inner.submitter.store().get(correlation_id).await?)
    }

    /// Re-derive the outcome of a farmer's last issuance from the registry.
    pub async fn reconcile_farmer(&self, farmer_id: &FarmerId) -> Result<ReconcileReport, OrchestrationError> {
        let _lock = self.inner.guard.lock(farmer_id).await;
        let record = self.farmer(farmer_id)?;

        let (outcome, correlation_id) = match &record.in_flight {
            Some(in_flight) => match self.inner.guard.reconcile(&in_flight.correlation_id).await? {
                Some(outcome) => {
                    self.apply_record(outcome.record()).await;
                    (outcome.as_str(), Some(in_flight.correlation_id.clone()))
                }
                None => {
                    self.inner.farmers.update(farmer_id, |r| r.in_flight = None).await;
                    ("nothing_to_reconcile", Some(in_flight.correlation_id.clone()))
                }
            },
            None => {
                if let Some(cert) = self.inner.guard.live_certificate(farmer_id).await? {
                    if record.certificate_id.as_ref() != Some(&cert.certificate_id)
                        || record.review != ReviewState::Certified
                    {
                        self.inner
                            .farmers
                            .update(farmer_id, |r| {
                                r.review = ReviewState::Certified;
                                r.certificate_id = Some(cert.certificate_id.clone());
                            })
                            .await;
                    }
                }
                ("nothing_to_reconcile", None)
            }
        };

        let record = self.farmer(farmer_id)?;
        Ok(ReconcileReport {
            farmer_id: farmer_id.to_string(),
            outcome: outcome.to_string(),
            correlation_id,
            status: record.status(),
            certificate_id: record.certificate_id.map(|c| c.to_string()),
        })
    }

    /// Settle every unresolved transaction record. Run once at startup,
    /// before serving traffic. Records still awaiting confirmation resume
    /// polling in the background.
    pub async fn recover_unresolved(&self) -> Result<usize, OrchestrationError> {
        let records = self.inner.submitter.store().list_unresolved().await?;
        let count = records.len();
        for record in records {
            let resumable = record.state == TransactionState::Pending && record.ledger_tx_ref.is_some();
            if resumable && !self.inner.guard.landed(&record.operation).await? {
                let handle = self.inner.submitter.resume(record);
                self.spawn_completion(handle);
                continue;
            }
            let outcome = self.inner.guard.reconcile_record(record).await?;
            self.apply_record(outcome.record()).await;
        }
        if count > 0 {
            tracing::info!(records = count, "startup reconciliation complete");
        }
        Ok(count)
    }

    // -- internals -----------------------------------------------------------

    fn farmer(&self, farmer_id: &FarmerId) -> Result<FarmerRecord, OrchestrationError> {
        self.inner
            .farmers
            .get(farmer_id)
            .ok_or_else(|| OrchestrationError::NotFound(format!("farmer {farmer_id} not found")))
    }

    async fn digest(
        &self,
        record: &FarmerRecord,
        doc_type: DocumentType,
    ) -> Result<farmcert_core::ContentDigest, OrchestrationError> {
        let doc = record
            .documents
            .get(doc_type)
            .ok_or_else(|| OrchestrationError::IncompleteDocuments {
                missing: vec![doc_type],
            })?;
        let bytes = self
            .inner
            .documents
            .fetch_bytes(&doc.blob_ref)
            .await
            .map_err(|source| OrchestrationError::Document { doc_type, source })?;
        Ok(sha256_digest(&bytes))
    }

    /// The signer, if the registry currently recognises it as admin.
    async fn authorized_signer(&self) -> Result<PrincipalId, OrchestrationError> {
        let signer = self.signer();
        let admin = self.ledger().admin().await?;
        if admin != signer {
            return Err(OrchestrationError::Forbidden(format!(
                "service signer {signer} is not the registry admin"
            )));
        }
        Ok(signer)
    }

    /// Wait up to the decision window, making sure the outcome is applied
    /// whenever it arrives.
    async fn await_decision(&self, mut handle: SubmissionHandle) -> TransactionRecord {
        self.spawn_completion(handle.clone());
        let record = handle.wait(self.inner.decision_wait).await;
        self.apply_record(&record).await;
        record
    }

    fn spawn_completion(&self, handle: SubmissionHandle) {
        let this = self.clone();
        tokio::spawn(async move {
            let record = handle.resolved().await;
            this.inner.metrics.record_submission(submission_label(&record));
            this.apply_record(&record).await;
        });
    }

    /// Fold a transaction record into farmer state. Idempotent.
    async fn apply_record(&self, record: &TransactionRecord) {
        let farmers = &self.inner.farmers;
        match &record.operation {
            LedgerOp::Issue(req) => {
                let owns = |r: &FarmerRecord| {
                    r.in_flight
                        .as_ref()
                        .is_some_and(|f| f.correlation_id == record.correlation_id)
                };
                match (&record.state, &record.failure) {
                    (TransactionState::Confirmed, _) => {
                        farmers
                            .update(&req.farmer_id, |r| {
                                r.review = ReviewState::Certified;
                                r.certificate_id = Some(req.certificate_id.clone());
                                r.ledger_tx_ref = record.ledger_tx_ref.clone();
                                r.last_error = None;
                                if owns(&*r) {
                                    r.in_flight = None;
                                }
                            })
                            .await;
                    }
                    (TransactionState::Failed, Some(failure)) if !failure.is_ambiguous() => {
                        farmers
                            .update(&req.farmer_id, |r| {
                                if let Some(f) = r.in_flight.take_if_matches(&record.correlation_id) {
                                    r.review = f.prior_review;
                                    r.last_error = Some(failure.to_string());
                                }
                            })
                            .await;
                    }
                    (TransactionState::Failed, failure) => {
                        let detail = failure
                            .as_ref()
                            .map(|f| f.to_string())
                            .unwrap_or_else(|| PENDING_RECONCILIATION.to_string());
                        farmers
                            .update(&req.farmer_id, |r| {
                                if owns(&*r) {
                                    r.last_error = Some(detail.clone());
                                }
                            })
                            .await;
                    }
                    _ => {}
                }
            }
            LedgerOp::Revoke { certificate_id, .. } => {
                if record.state != TransactionState::Confirmed {
                    return;
                }
                let holder = farmers
                    .list()
                    .into_iter()
                    .find(|r| r.certificate_id.as_ref() == Some(certificate_id));
                if let Some(holder) = holder {
                    farmers
                        .update(&holder.farmer_id, |r| {
                            if r.review == ReviewState::Certified {
                                r.review = ReviewState::Verified;
                            }
                        })
                        .await;
                }
            }
            LedgerOp::TransferAdmin { new_admin } => {
                if record.state != TransactionState::Confirmed {
                    return;
                }
                let mut signer = self.inner.signer.write();
                if &*signer != new_admin {
                    tracing::info!(from = %*signer, to = %new_admin, "registry admin transferred");
                    *signer = new_admin.clone();
                }
            }
        }
    }
}

/// Take the in-flight issuance if it belongs to `correlation_id`.
trait TakeInFlight {
    fn take_if_matches(&mut self, correlation_id: &str) -> Option<InFlightIssuance>;
}

impl TakeInFlight for Option<InFlightIssuance> {
    fn take_if_matches(&mut self, correlation_id: &str) -> Option<InFlightIssuance> {
        if self.as_ref().is_some_and(|f| f.correlation_id == correlation_id) {
            self.take()
        } else {
            None
        }
    }
}

/// An issuance record may be written over only by a new attempt for the same
/// farmer, and only once it is known not to have landed.
fn replaceable_issuance(existing: &TransactionRecord, farmer_id: &FarmerId) -> bool {
    let same_farmer = matches!(&existing.operation, LedgerOp::Issue(req) if &req.farmer_id == farmer_id);
    same_farmer && existing.state == TransactionState::Failed && !existing.needs_reconciliation()
}

fn submission_label(record: &TransactionRecord) -> &'static str {
    match (&record.state, &record.failure) {
        (TransactionState::Confirmed, _) => "confirmed",
        (TransactionState::Failed, Some(f)) if !f.is_ambiguous() => "reverted",
        _ => "unresolved",
    }
}

fn issuance_outcome(farmer_id: &FarmerId, certificate_id: &CertificateId, record: &TransactionRecord) -> DecisionOutcome {
    match (&record.state, &record.failure) {
        (TransactionState::Confirmed, _) => DecisionOutcome::Certified {
            farmer_id: farmer_id.to_string(),
            certificate_id: certificate_id.to_string(),
            ledger_tx_ref: record.ledger_tx_ref.as_ref().map(|t| t.to_string()),
            already_certified: false,
        },
        (TransactionState::Failed, Some(TransactionFailure::Reverted { code, message })) => {
            DecisionOutcome::Failed {
                farmer_id: farmer_id.to_string(),
                certificate_id: certificate_id.to_string(),
                code: code.clone(),
                reason: message.clone(),
            }
        }
        (TransactionState::Failed, _) => DecisionOutcome::PendingConfirmation {
            farmer_id: farmer_id.to_string(),
            certificate_id: certificate_id.to_string(),
            correlation_id: record.correlation_id.clone(),
            reason: PENDING_RECONCILIATION.to_string(),
        },
        _ => DecisionOutcome::PendingConfirmation {
            farmer_id: farmer_id.to_string(),
            certificate_id: certificate_id.to_string(),
            correlation_id: record.correlation_id.clone(),
            reason: AWAITING_CONFIRMATION.to_string(),
        },
    }
}
