//! # Certificate Records
//!
//! A [`Certificate`] is created only by a confirmed issuance and mutated only
//! by a confirmed revocation. Records are never deleted.

use farmcert_core::{CertificateId, ContentDigest, FarmerId, PrincipalId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::verification::VerificationOutcome;

/// Stored status of a certificate. Expiry is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    /// Issued and not revoked.
    Active,
    /// Revoked by the admin. Terminal.
    Revoked,
}

impl CertificateStatus {
    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A certificate record as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Unique key, assigned by the caller of `issue`.
    pub certificate_id: CertificateId,
    /// The certified farmer.
    pub farmer_id: FarmerId,
    /// Display name of the farmer at issuance time.
    pub farmer_name: String,
    /// Commitment over the identity document.
    pub identity_hash: ContentDigest,
    /// Commitment over the eligibility certificate.
    pub eligibility_hash: ContentDigest,
    /// When the issuance was applied.
    pub issued_at: Timestamp,
    /// `issued_at` plus the validity window.
    pub expires_at: Timestamp,
    /// Stored status.
    pub status: CertificateStatus,
    /// Present iff `status` is `Revoked`.
    pub revocation_reason: Option<String>,
    /// Admin principal that wrote the record.
    pub issuer: PrincipalId,
}

impl Certificate {
    /// Whether the certificate is valid at `now`: active and not yet expired.
    pub fn is_valid_at(&self, now: &Timestamp) -> bool {
        self.status == CertificateStatus::Active && *now < self.expires_at
    }

    /// Classify the certificate at `now`.
    ///
    /// Revocation takes precedence over expiry: a revoked certificate is
    /// reported as revoked even after its window has lapsed.
    pub fn outcome_at(&self, now: &Timestamp) -> VerificationOutcome {
        match self.status {
            CertificateStatus::Revoked => VerificationOutcome::Revoked,
            CertificateStatus::Active if *now < self.expires_at => VerificationOutcome::Valid,
            CertificateStatus::Active => VerificationOutcome::Expired,
        }
    }
}
