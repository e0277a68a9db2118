//! # Ledger Port
//!
//! The abstract interface through which the service drives the certificate
//! registry: submit a write, poll for its fate, read current state.
//!
//! The [`Ledger`] trait is **sealed**. Only adapters in this crate implement
//! it, so every implementation honours the same contract:
//!
//! - `submit_write` returning `Ok` means the write was *accepted for
//!   inclusion*, not that it took effect.
//! - `poll_status` reports `Confirmed` only once the write is visible to
//!   `read`.
//! - A `Reverted` status is final; the write will never take effect.
//! - [`LedgerError::ChainUnavailable`] is transient and says nothing about
//!   whether an earlier write landed.

pub mod memory;

#[cfg(feature = "evm-ledger")]
pub mod evm;

use async_trait::async_trait;
use farmcert_core::{CertificateId, FarmerId, PrincipalId, Timestamp};
use farmcert_registry::{Certificate, IssueRequest, RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors talking to the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger could not be reached or did not answer in time.
    #[error("ledger {ledger} unavailable: {detail}")]
    ChainUnavailable {
        /// Ledger name.
        ledger: String,
        /// What went wrong.
        detail: String,
    },

    /// The ledger refused the submission outright (malformed call, bad signer).
    #[error("ledger rejected submission: {0}")]
    Rejected(String),

    /// The ledger has no record of this transaction.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxRef),
}

impl LedgerError {
    /// Whether retrying later could give a different answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. } | Self::UnknownTransaction(_))
    }
}

/// Ledger-assigned transaction reference (a transaction hash on EVM chains).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(String);

impl TxRef {
    /// Wrap a ledger-assigned reference.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Access the reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registry write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerOp {
    /// Create a certificate.
    Issue(IssueRequest),
    /// Revoke a certificate.
    Revoke {
        /// Target certificate.
        certificate_id: CertificateId,
        /// Reason recorded on the certificate.
        reason: String,
    },
    /// Hand the admin role to another principal.
    TransferAdmin {
        /// New admin.
        new_admin: PrincipalId,
    },
}

impl LedgerOp {
    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Issue(_) => "issue",
            Self::Revoke { .. } => "revoke",
            Self::TransferAdmin { .. } => "transfer_admin",
        }
    }

    /// Correlation id for the off-ledger record of this write.
    ///
    /// An issuance is keyed by its intended certificate id, so a second
    /// attempt for the same certificate finds the first one's record. Other
    /// writes get a time-qualified key.
    pub fn correlation_id(&self, at: &Timestamp) -> String {
        match self {
            Self::Issue(req) => req.certificate_id.to_string(),
            Self::Revoke { certificate_id, .. } => {
                format!("REVOKE-{certificate_id}-{}", at.unix_millis())
            }
            Self::TransferAdmin { new_admin } => {
                format!("ADMIN-{new_admin}-{}", at.unix_millis())
            }
        }
    }

    /// The certificate this write concerns, if any.
    pub fn certificate_id(&self) -> Option<&CertificateId> {
        match self {
            Self::Issue(req) => Some(&req.certificate_id),
            Self::Revoke { certificate_id, .. } => Some(certificate_id),
            Self::TransferAdmin { .. } => None,
        }
    }
}

/// A registry read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerQuery {
    /// Fetch a certificate record by id.
    CertificateById(CertificateId),
    /// Fetch the most recently issued certificate of a farmer.
    LatestForSubject(FarmerId),
    /// Current admin principal.
    Admin,
}

/// Result of a [`LedgerQuery`]. Records are returned raw; validity is
/// evaluated by the caller against its own clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerReadResult {
    /// A certificate lookup, `None` if absent.
    Certificate(Option<Certificate>),
    /// The admin principal.
    Admin(PrincipalId),
}

/// Why a write reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revert {
    /// Machine-readable code (`ALREADY_EXISTS`, `UNAUTHORIZED`, ...).
    pub code: String,
    /// Ledger-supplied message, surfaced verbatim.
    pub message: String,
}

impl From<&RegistryError> for Revert {
    fn from(err: &RegistryError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for Revert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Fate of a submitted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Not yet decided.
    Pending,
    /// Applied and visible to reads.
    Confirmed {
        /// Block containing the write, where the ledger has blocks.
        block: Option<u64>,
    },
    /// Rejected by the registry. Final.
    Reverted(Revert),
}

/// A ledger hosting the certificate registry.
///
/// Sealed: see the module docs for the contract every adapter honours.
#[async_trait]
pub trait Ledger: private::Sealed + Send + Sync + std::fmt::Debug {
    /// Submit a write signed by `signer`.
    async fn submit_write(&self, op: &LedgerOp, signer: &PrincipalId) -> Result<TxRef, LedgerError>;

    /// Check whether a submitted write has confirmed or reverted.
    async fn poll_status(&self, tx: &TxRef) -> Result<PollStatus, LedgerError>;

    /// Read registry state.
    async fn read(&self, query: &LedgerQuery) -> Result<LedgerReadResult, LedgerError>;

    /// Human-readable ledger name for logs and errors.
    fn name(&self) -> &str;
}

impl<'a> dyn Ledger + 'a {
    /// Fetch a certificate by id.
    pub async fn certificate(&self, id: &CertificateId) -> Result<Option<Certificate>, LedgerError> {
        match self.read(&LedgerQuery::CertificateById(id.clone())).await? {
            LedgerReadResult::Certificate(c) => Ok(c),
            other => Err(self.unexpected(other)),
        }
    }

    /// Fetch the most recently issued certificate of `farmer_id`.
    pub async fn latest_for_subject(&self, farmer_id: &FarmerId) -> Result<Option<Certificate>, LedgerError> {
        match self.read(&LedgerQuery::LatestForSubject(farmer_id.clone())).await? {
            LedgerReadResult::Certificate(c) => Ok(c),
            other => Err(self.unexpected(other)),
        }
    }

    /// Fetch the current admin principal.
    pub async fn admin(&self) -> Result<PrincipalId, LedgerError> {
        match self.read(&LedgerQuery::Admin).await? {
            LedgerReadResult::Admin(p) => Ok(p),
            other => Err(self.unexpected(other)),
        }
    }

    fn unexpected(&self, result: LedgerReadResult) -> LedgerError {
        LedgerError::ChainUnavailable {
            ledger: self.name().to_string(),
            detail: format!("unexpected read result: {result:?}"),
        }
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::memory::InMemoryLedger {}
    #[cfg(feature = "evm-ledger")]
    impl Sealed for super::evm::EvmLedger {}
}
