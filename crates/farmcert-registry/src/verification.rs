//! # Verification Results
//!
//! Derived, never stored. `is_valid` is computed from the record and the
//! clock on every read.

use farmcert_core::{CertificateId, FarmerId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;

/// What a registry read found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Active and within its validity window.
    Valid,
    /// Active but `now ≥ expires_at`.
    Expired,
    /// Revoked by the admin.
    Revoked,
    /// No such certificate, or no certificate for the subject.
    NotFound,
}

impl VerificationOutcome {
    /// Return the string representation of this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The answer to "is this certificate valid right now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Classification of the record at `checked_at`.
    pub outcome: VerificationOutcome,
    /// `true` iff `outcome` is `Valid`.
    pub is_valid: bool,
    /// The certificate examined. For a by-id miss this echoes the queried id.
    pub certificate_id: Option<CertificateId>,
    /// Subject of the certificate. Absent on a miss.
    pub farmer_id: Option<FarmerId>,
    /// Farmer name recorded at issuance. Absent on a miss.
    pub farmer_name: Option<String>,
    /// Issuance time. Absent on a miss.
    pub issued_at: Option<Timestamp>,
    /// Expiry time. Absent on a miss.
    pub expires_at: Option<Timestamp>,
    /// Revocation reason, present only for revoked certificates.
    pub revocation_reason: Option<String>,
    /// Human-readable explanation of the outcome.
    pub reason: String,
    /// The instant validity was evaluated at.
    pub checked_at: Timestamp,
}

impl VerificationResult {
    /// Evaluate `certificate` at `now`.
    pub fn from_certificate(certificate: &Certificate, now: Timestamp) -> Self {
        let outcome = certificate.outcome_at(&now);
        let reason = match outcome {
            VerificationOutcome::Valid => format!("certificate valid until {}", certificate.expires_at),
            VerificationOutcome::Expired => format!("certificate expired at {}", certificate.expires_at),
            VerificationOutcome::Revoked => format!(
                "certificate revoked: {}",
                certificate.revocation_reason.as_deref().unwrap_or("no reason recorded")
            ),
            VerificationOutcome::NotFound => "certificate not found".to_string(),
        };
        Self {
            outcome,
            is_valid: outcome == VerificationOutcome::Valid,
            certificate_id: Some(certificate.certificate_id.clone()),
            farmer_id: Some(certificate.farmer_id.clone()),
            farmer_name: Some(certificate.farmer_name.clone()),
            issued_at: Some(certificate.issued_at),
            expires_at: Some(certificate.expires_at),
            revocation_reason: certificate.revocation_reason.clone(),
            reason,
            checked_at: now,
        }
    }

    /// A miss. `certificate_id` echoes the query when it was by id.
    pub fn not_found(certificate_id: Option<CertificateId>, reason: impl Into<String>, now: Timestamp) -> Self {
        Self {
            outcome: VerificationOutcome::NotFound,
            is_valid: false,
            certificate_id,
            farmer_id: None,
            farmer_name: None,
            issued_at: None,
            expires_at: None,
            revocation_reason: None,
            reason: reason.into(),
            checked_at: now,
        }
    }
}
