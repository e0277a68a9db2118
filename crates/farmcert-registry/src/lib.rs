#![deny(missing_docs)]

//! # farmcert-registry: Certificate Registry State Machine
//!
//! The authoritative certificate store and its transition rules, exactly as a
//! ledger contract would expose them: atomic, admin-gated writes and
//! unrestricted reads. Nothing here performs I/O; the ledger crate decides
//! where the registry lives and how writes reach it.
//!
//! ## Lifecycle
//!
//! ```text
//! (absent) ──issue──▶ Active ──revoke──▶ Revoked
//!                       │
//!                       └── now ≥ expires_at ──▶ reads report Expired
//! ```
//!
//! Expiry is not a transition. No write happens at `expires_at`; reads
//! compare against the clock.
//!
//! The registry is a commitment store, not a document store. Only SHA-256
//! commitments of the identity and eligibility documents are recorded.

pub mod admin;
pub mod certificate;
pub mod registry;
pub mod verification;

pub use admin::{AdminPrincipal, AdminTransfer};
pub use certificate::{Certificate, CertificateStatus};
pub use registry::{
    CertificateRegistry, IssueRequest, RegistryConfig, RegistryError, RegistryEvent,
    RegistryEventKind, ReissuePolicy, DEFAULT_VALIDITY_DAYS,
};
pub use verification::{VerificationOutcome, VerificationResult};
