//! # Validation Errors
//!
//! Construction-time failures for identifiers and commitments. Each variant
//! carries the rejected input so operators can see exactly what was sent.

use thiserror::Error;

/// Validation errors for domain primitive newtypes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Farmer identifier is empty, too long, or contains forbidden characters.
    #[error("invalid farmer id: \"{0}\" (expected 1-128 characters of [A-Za-z0-9._-])")]
    InvalidFarmerId(String),

    /// Certificate identifier is empty, too long, or contains forbidden characters.
    #[error("invalid certificate id: \"{0}\" (expected 1-128 characters of [A-Za-z0-9._-])")]
    InvalidCertificateId(String),

    /// Principal identifier is empty, too long, or contains forbidden characters.
    #[error("invalid principal id: \"{0}\" (expected 1-128 characters of [A-Za-z0-9._:-])")]
    InvalidPrincipalId(String),

    /// Digest is not 64 hex characters.
    #[error("invalid digest: \"{0}\" (expected 64 hex characters)")]
    InvalidDigest(String),
}
