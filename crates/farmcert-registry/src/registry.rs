//! # Certificate Registry
//!
//! The state machine a registry contract implements. Every write takes the
//! caller's identity and checks it against the [`AdminPrincipal`] first;
//! reads are unrestricted.
//!
//! A single write is atomic by construction (`&mut self`). Whoever hosts the
//! registry serializes writes; the registry itself holds no locks.

use std::collections::HashMap;
use std::sync::Arc;

use farmcert_core::{CertificateId, Clock, ContentDigest, FarmerId, PrincipalId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::{AdminPrincipal, AdminTransfer};
use crate::certificate::{Certificate, CertificateStatus};
use crate::verification::VerificationResult;

/// Default validity window in days.
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

// ─── Errors ──────────────────────────────────────────────────────────

/// Reasons the registry refuses a write.
///
/// On a real ledger these surface as transaction reverts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Caller is not the current admin principal.
    #[error("caller {caller} is not the registry admin")]
    Unauthorized {
        /// The rejected caller.
        caller: PrincipalId,
    },

    /// The certificate id is taken, or the farmer already holds a live certificate.
    #[error("certificate {certificate_id} already exists: {detail}")]
    AlreadyExists {
        /// The certificate id in the rejected write.
        certificate_id: CertificateId,
        /// Which uniqueness rule was violated.
        detail: String,
    },

    /// Revocation of a certificate that is already revoked.
    #[error("certificate {certificate_id} is already revoked")]
    AlreadyRevoked {
        /// The certificate in question.
        certificate_id: CertificateId,
    },

    /// No certificate with this id.
    #[error("certificate {certificate_id} not found")]
    NotFound {
        /// The unknown id.
        certificate_id: CertificateId,
    },

    /// A write argument is malformed (empty name, empty reason).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RegistryError {
    /// Machine-readable code, stable across ledgers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::AlreadyRevoked { .. } => "ALREADY_REVOKED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }
}

// ─── Configuration ───────────────────────────────────────────────────

/// Whether a farmer may be certified again once an earlier certificate is dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReissuePolicy {
    /// At most one live certificate per farmer. After expiry or revocation a
    /// new certificate may be issued under a new id; old records stay.
    #[default]
    AfterExpiry,
    /// One certificate per farmer, ever.
    Never,
}

impl std::str::FromStr for ReissuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "after_expiry" => Ok(Self::AfterExpiry),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown reissue policy \"{other}\" (expected after_expiry or never)"
            )),
        }
    }
}

/// Registry parameters fixed at deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Days between `issued_at` and `expires_at`.
    pub validity_days: i64,
    /// Re-certification rule.
    pub reissue_policy: ReissuePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            validity_days: DEFAULT_VALIDITY_DAYS,
            reissue_policy: ReissuePolicy::default(),
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────

/// What a successful write did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEventKind {
    /// A certificate was created.
    CertificateIssued {
        /// New certificate.
        certificate_id: CertificateId,
        /// Its subject.
        farmer_id: FarmerId,
        /// Admin that issued it.
        issuer: PrincipalId,
    },
    /// A certificate was revoked.
    CertificateRevoked {
        /// Revoked certificate.
        certificate_id: CertificateId,
        /// Reason given.
        reason: String,
        /// Admin that revoked it.
        revoked_by: PrincipalId,
    },
    /// The admin role changed hands.
    AdminTransferred {
        /// Previous admin.
        from: PrincipalId,
        /// New admin.
        to: PrincipalId,
    },
}

/// An entry in the registry's append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// When the write was applied.
    pub at: Timestamp,
    /// What happened.
    #[serde(flatten)]
    pub kind: RegistryEventKind,
}

// ─── Registry ────────────────────────────────────────────────────────

/// Arguments of an issuance write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    /// Caller-assigned unique key.
    pub certificate_id: CertificateId,
    /// Subject.
    pub farmer_id: FarmerId,
    /// Display name of the subject.
    pub farmer_name: String,
    /// Commitment over the identity document.
    pub identity_hash: ContentDigest,
    /// Commitment over the eligibility certificate.
    pub eligibility_hash: ContentDigest,
}

/// The certificate registry.
#[derive(Debug)]
pub struct CertificateRegistry {
    admin: AdminPrincipal,
    certificates: HashMap<CertificateId, Certificate>,
    /// Certificate ids per farmer in issuance order.
    by_subject: HashMap<FarmerId, Vec<CertificateId>>,
    events: Vec<RegistryEvent>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl CertificateRegistry {
    /// Create an empty registry administered by `admin`.
    pub fn new(admin: PrincipalId, config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            admin: AdminPrincipal::new(admin, now),
            certificates: HashMap::new(),
            by_subject: HashMap::new(),
            events: Vec::new(),
            config,
            clock,
        }
    }

    /// The current admin principal.
    pub fn admin(&self) -> &PrincipalId {
        self.admin.current()
    }

    /// Admin handover history.
    pub fn admin_transfers(&self) -> &[AdminTransfer] {
        self.admin.transfers()
    }

    /// Deployment parameters.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a certificate. The only write that creates records.
    ///
    /// Fails `Unauthorized` for a non-admin caller, `AlreadyExists` if the id
    /// is taken or the farmer still holds a live certificate (under
    /// [`ReissuePolicy::Never`], any certificate at all).
    pub fn issue(
        &mut self,
        caller: &PrincipalId,
        request: IssueRequest,
    ) -> Result<&Certificate, RegistryError> {
        self.admin.authorize(caller)?;

        let farmer_name = request.farmer_name.trim();
        if farmer_name.is_empty() {
            return Err(RegistryError::InvalidArgument("farmer name must not be empty".into()));
        }

        if self.certificates.contains_key(&request.certificate_id) {
            return Err(RegistryError::AlreadyExists {
                certificate_id: request.certificate_id,
                detail: "certificate id already registered".into(),
            });
        }

        let now = self.clock.now();
        if let Some(existing) = self.blocking_certificate(&request.farmer_id, &now) {
            return Err(RegistryError::AlreadyExists {
                detail: format!(
                    "farmer {} already holds certificate {}",
                    request.farmer_id, existing.certificate_id
                ),
                certificate_id: request.certificate_id,
            });
        }

        let certificate = Certificate {
            certificate_id: request.certificate_id.clone(),
            farmer_id: request.farmer_id.clone(),
            farmer_name: farmer_name.to_string(),
            identity_hash: request.identity_hash,
            eligibility_hash: request.eligibility_hash,
            issued_at: now,
            expires_at: now.plus_days(self.config.validity_days),
            status: CertificateStatus::Active,
            revocation_reason: None,
            issuer: caller.clone(),
        };

        self.by_subject
            .entry(request.farmer_id.clone())
            .or_default()
            .push(request.certificate_id.clone());
        self.record(
            now,
            RegistryEventKind::CertificateIssued {
                certificate_id: request.certificate_id.clone(),
                farmer_id: request.farmer_id,
                issuer: caller.clone(),
            },
        );
        Ok(&*self
            .certificates
            .entry(request.certificate_id)
            .or_insert(certificate))
    }

    /// Revoke a certificate. All fields other than status and reason are kept.
    pub fn revoke(
        &mut self,
        caller: &PrincipalId,
        certificate_id: &CertificateId,
        reason: &str,
    ) -> Result<&Certificate, RegistryError> {
        self.admin.authorize(caller)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RegistryError::InvalidArgument("revocation reason must not be empty".into()));
        }

        let now = self.clock.now();
        let certificate = self
            .certificates
            .get_mut(certificate_id)
            .ok_or_else(|| RegistryError::NotFound {
                certificate_id: certificate_id.clone(),
            })?;
        if certificate.status == CertificateStatus::Revoked {
            return Err(RegistryError::AlreadyRevoked {
                certificate_id: certificate_id.clone(),
            });
        }
        certificate.status = CertificateStatus::Revoked;
        certificate.revocation_reason = Some(reason.to_string());

        self.record(
            now,
            RegistryEventKind::CertificateRevoked {
                certificate_id: certificate_id.clone(),
                reason: reason.to_string(),
                revoked_by: caller.clone(),
            },
        );
        self.certificates
            .get(certificate_id)
            .ok_or_else(|| RegistryError::NotFound {
                certificate_id: certificate_id.clone(),
            })
    }

    /// Hand the admin role to `new_admin`.
    pub fn transfer_admin(
        &mut self,
        caller: &PrincipalId,
        new_admin: PrincipalId,
    ) -> Result<(), RegistryError> {
        let now = self.clock.now();
        let transfer = self.admin.transfer(caller, new_admin, now)?.clone();
        self.record(
            now,
            RegistryEventKind::AdminTransferred {
                from: transfer.from,
                to: transfer.to,
            },
        );
        Ok(())
    }

    /// Evaluate a certificate by id at the current time.
    pub fn verify_by_id(&self, certificate_id: &CertificateId) -> VerificationResult {
        let now = self.clock.now();
        match self.certificates.get(certificate_id) {
            Some(certificate) => VerificationResult::from_certificate(certificate, now),
            None => VerificationResult::not_found(
                Some(certificate_id.clone()),
                format!("no certificate with id {certificate_id}"),
                now,
            ),
        }
    }

    /// Evaluate the most recently issued certificate of `farmer_id`.
    pub fn verify_by_subject(&self, farmer_id: &FarmerId) -> VerificationResult {
        let now = self.clock.now();
        match self.latest_for_subject(farmer_id) {
            Some(certificate) => VerificationResult::from_certificate(certificate, now),
            None => VerificationResult::not_found(
                None,
                format!("no certificate issued to farmer {farmer_id}"),
                now,
            ),
        }
    }

    /// Direct record fetch, regardless of validity.
    pub fn get(&self, certificate_id: &CertificateId) -> Option<&Certificate> {
        self.certificates.get(certificate_id)
    }

    /// Most recently issued certificate of `farmer_id`.
    pub fn latest_for_subject(&self, farmer_id: &FarmerId) -> Option<&Certificate> {
        self.by_subject
            .get(farmer_id)
            .and_then(|ids| ids.last())
            .and_then(|id| self.certificates.get(id))
    }

    /// All certificates of `farmer_id`, oldest first.
    pub fn history_for_subject(&self, farmer_id: &FarmerId) -> Vec<&Certificate> {
        self.by_subject
            .get(farmer_id)
            .map(|ids| ids.iter().filter_map(|id| self.certificates.get(id)).collect())
            .unwrap_or_default()
    }

    /// The append-only event log.
    pub fn events(&self) -> &[RegistryEvent] {
        &self.events
    }

    /// Number of certificate records, live or not.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Whether no certificate has ever been issued.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// The record that prevents a new issuance for `farmer_id`, if any.
    fn blocking_certificate(&self, farmer_id: &FarmerId, now: &Timestamp) -> Option<&Certificate> {
        let history = self.history_for_subject(farmer_id);
        match self.config.reissue_policy {
            ReissuePolicy::AfterExpiry => history.into_iter().rev().find(|c| c.is_valid_at(now)),
            ReissuePolicy::Never => history.into_iter().last(),
        }
    }

    fn record(&mut self, at: Timestamp, kind: RegistryEventKind) {
        let sequence = self.events.len() as u64 + 1;
        self.events.push(RegistryEvent { sequence, at, kind });
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::VerificationOutcome;
    use chrono::Duration;
    use farmcert_core::{sha256_digest, ManualClock};

    fn p(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn cid(s: &str) -> CertificateId {
        CertificateId::new(s).unwrap()
    }

    fn fid(s: &str) -> FarmerId {
        FarmerId::new(s).unwrap()
    }

    fn setup(policy: ReissuePolicy) -> (CertificateRegistry, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_unix_secs(1_700_000_000).unwrap());
        let config = RegistryConfig {
            validity_days: 365,
            reissue_policy: policy,
        };
        (
            CertificateRegistry::new(p("admin"), config, Arc::new(clock.clone())),
            clock,
        )
    }

    fn request(certificate_id: &str, farmer_id: &str) -> IssueRequest {
        IssueRequest {
            certificate_id: cid(certificate_id),
            farmer_id: fid(farmer_id),
            farmer_name: "A. Farmer".into(),
            identity_hash: sha256_digest(b"aadhaar"),
            eligibility_hash: sha256_digest(b"land record"),
        }
    }

    #[test]
    fn issue_then_verify_is_valid_with_full_window() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        let cert = registry.issue(&p("admin"), request("CERT-1001", "F-42")).unwrap().clone();
        assert_eq!(cert.expires_at, cert.issued_at.plus_days(365));
        assert_eq!(cert.issuer, p("admin"));

        let result = registry.verify_by_id(&cid("CERT-1001"));
        assert!(result.is_valid);
        assert_eq!(result.outcome, VerificationOutcome::Valid);
        assert_eq!(result.farmer_id, Some(fid("F-42")));
        assert_eq!(result.expires_at, Some(cert.issued_at.plus_days(365)));
    }

    #[test]
    fn validity_lapses_at_expiry_without_a_write() {
        let (mut registry, clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        let events_before = registry.events().len();

        clock.advance(Duration::days(365) - Duration::seconds(1));
        assert!(registry.verify_by_id(&cid("CERT-1")).is_valid);

        clock.advance(Duration::seconds(1));
        let result = registry.verify_by_id(&cid("CERT-1"));
        assert!(!result.is_valid);
        assert_eq!(result.outcome, VerificationOutcome::Expired);
        assert_eq!(registry.events().len(), events_before);
        assert_eq!(registry.get(&cid("CERT-1")).unwrap().status, CertificateStatus::Active);
    }

    #[test]
    fn non_admin_cannot_issue() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        let err = registry.issue(&p("farmer:F-1"), request("CERT-1", "F-1")).unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_certificate_id_rejected() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        let err = registry.issue(&p("admin"), request("CERT-1", "F-2")).unwrap_err();
        assert_eq!(err.code(), "ALREADY_EXISTS");
        assert_eq!(registry.len(), 1);
        assert!(registry.latest_for_subject(&fid("F-2")).is_none());
    }

    #[test]
    fn live_certificate_blocks_second_issue_for_farmer() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        let err = registry.issue(&p("admin"), request("CERT-2", "F-1")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert_eq!(registry.history_for_subject(&fid("F-1")).len(), 1);
    }

    #[test]
    fn reissue_after_expiry_uses_new_id_and_keeps_history() {
        let (mut registry, clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        clock.advance(Duration::days(366));
        registry.issue(&p("admin"), request("CERT-2", "F-1")).unwrap();

        let history = registry.history_for_subject(&fid("F-1"));
        assert_eq!(history.len(), 2);
        let by_subject = registry.verify_by_subject(&fid("F-1"));
        assert_eq!(by_subject.certificate_id, Some(cid("CERT-2")));
        assert!(by_subject.is_valid);
        assert_eq!(registry.verify_by_id(&cid("CERT-1")).outcome, VerificationOutcome::Expired);
    }

    #[test]
    fn reissue_after_revocation_allowed() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        registry.revoke(&p("admin"), &cid("CERT-1"), "document fraud").unwrap();
        assert!(registry.issue(&p("admin"), request("CERT-2", "F-1")).is_ok());
    }

    #[test]
    fn never_policy_blocks_any_reissue() {
        let (mut registry, clock) = setup(ReissuePolicy::Never);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        clock.advance(Duration::days(400));
        assert!(matches!(
            registry.issue(&p("admin"), request("CERT-2", "F-1")),
            Err(RegistryError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn revoke_preserves_record_and_invalidates() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        let issued = registry.issue(&p("admin"), request("CERT-1001", "F-42")).unwrap().clone();
        registry.revoke(&p("admin"), &cid("CERT-1001"), "document fraud").unwrap();

        let result = registry.verify_by_id(&cid("CERT-1001"));
        assert!(!result.is_valid);
        assert_eq!(result.outcome, VerificationOutcome::Revoked);

        let record = registry.get(&cid("CERT-1001")).unwrap();
        assert_eq!(record.status, CertificateStatus::Revoked);
        assert_eq!(record.revocation_reason.as_deref(), Some("document fraud"));
        assert_eq!(record.identity_hash, issued.identity_hash);
        assert_eq!(record.issued_at, issued.issued_at);
        assert_eq!(record.expires_at, issued.expires_at);
    }

    #[test]
    fn non_admin_revoke_leaves_status_unchanged() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        let err = registry.revoke(&p("mallory"), &cid("CERT-1"), "spite").unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized { .. }));
        assert_eq!(registry.get(&cid("CERT-1")).unwrap().status, CertificateStatus::Active);
    }

    #[test]
    fn double_revoke_keeps_first_reason() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        registry.revoke(&p("admin"), &cid("CERT-1"), "document fraud").unwrap();
        let err = registry.revoke(&p("admin"), &cid("CERT-1"), "second reason").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRevoked { .. }));
        assert_eq!(
            registry.get(&cid("CERT-1")).unwrap().revocation_reason.as_deref(),
            Some("document fraud")
        );
    }

    #[test]
    fn revoke_unknown_is_not_found() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        assert!(matches!(
            registry.revoke(&p("admin"), &cid("CERT-X"), "r"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn unknown_id_is_not_found_without_fields() {
        let (registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        let result = registry.verify_by_id(&cid("CERT-UNKNOWN"));
        assert_eq!(result.outcome, VerificationOutcome::NotFound);
        assert!(!result.is_valid);
        assert!(result.farmer_id.is_none());
        assert!(result.farmer_name.is_none());
        assert!(result.expires_at.is_none());
    }

    #[test]
    fn transfer_admin_changes_who_can_write() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.transfer_admin(&p("admin"), p("ops")).unwrap();
        assert_eq!(registry.admin(), &p("ops"));
        assert!(registry.issue(&p("admin"), request("CERT-1", "F-1")).is_err());
        let cert = registry.issue(&p("ops"), request("CERT-1", "F-1")).unwrap();
        assert_eq!(cert.issuer, p("ops"));
    }

    #[test]
    fn event_log_is_sequenced() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        registry.issue(&p("admin"), request("CERT-1", "F-1")).unwrap();
        registry.revoke(&p("admin"), &cid("CERT-1"), "fraud").unwrap();
        registry.transfer_admin(&p("admin"), p("ops")).unwrap();
        // Rejected writes leave no trace.
        let _ = registry.revoke(&p("admin"), &cid("CERT-1"), "again");

        let events = registry.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(matches!(events[2].kind, RegistryEventKind::AdminTransferred { .. }));
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["type"], "certificate_issued");
    }

    #[test]
    fn empty_farmer_name_rejected() {
        let (mut registry, _clock) = setup(ReissuePolicy::AfterExpiry);
        let mut req = request("CERT-1", "F-1");
        req.farmer_name = "   ".into();
        assert!(matches!(
            registry.issue(&p("admin"), req),
            Err(RegistryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn reissue_policy_parses() {
        assert_eq!("never".parse::<ReissuePolicy>().unwrap(), ReissuePolicy::Never);
        assert_eq!("after_expiry".parse::<ReissuePolicy>().unwrap(), ReissuePolicy::AfterExpiry);
        assert!("sometimes".parse::<ReissuePolicy>().is_err());
    }
}
