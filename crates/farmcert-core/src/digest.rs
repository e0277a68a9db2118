//! # Document Commitments
//!
//! [`ContentDigest`] is a SHA-256 commitment over the exact bytes of an
//! uploaded document. The registry stores these instead of the documents
//! themselves; a verifier holding the original file recomputes the digest and
//! compares.
//!
//! The hasher is a pure function of its input. Retrying a hash after a crash
//! or timeout yields the same commitment, which is what lets reconciliation
//! compare a resubmission against what already landed on the ledger.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// A 32-byte SHA-256 commitment.
///
/// Serializes as a lowercase hex string. On EVM ledgers this is the
/// `bytes32` argument of the issuance call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(ValidationError::InvalidDigest(s.to_string()));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ValidationError::InvalidDigest(s.to_string()))?;
        }
        Ok(Self(out))
    }

    /// Access the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Recompute the commitment over `document` and compare.
    ///
    /// Returns `false` for any substituted or altered document.
    pub fn matches(&self, document: &[u8]) -> bool {
        sha256_digest(document) == *self
    }
}

/// Compute the SHA-256 commitment over raw document bytes.
pub fn sha256_digest(document: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(document);
    ContentDigest(hasher.finalize().into())
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.strip_prefix("sha256:").unwrap_or(s))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
