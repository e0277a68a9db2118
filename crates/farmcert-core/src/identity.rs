//! # Identity Newtypes
//!
//! String identifiers for farmers, certificates, and signing principals.
//! Each is a distinct type and validates its format at construction time,
//! including when deserialized from a request body or a database row.
//!
//! Identifiers end up as path segments, log fields, and contract call
//! arguments, so the accepted alphabet is deliberately narrow.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::temporal::Timestamp;

const MAX_ID_LEN: usize = 128;

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn valid_id(s: &str, extra: fn(char) -> bool) -> bool {
    !s.is_empty() && s.len() <= MAX_ID_LEN && s.chars().all(|c| is_id_char(c) || extra(c))
}

/// Identifier of a farmer, the subject of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FarmerId(String);

impl FarmerId {
    /// Create a farmer identifier, validating its format.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if valid_id(&s, |_| false) {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidFarmerId(s))
        }
    }

    /// Access the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique key of a certificate record in the registry.
///
/// Caller-assigned. When the caller does not supply one, [`CertificateId::generate`]
/// derives `CERT-{farmerId}-{unixMillis}` from the decision time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CertificateId(String);

impl CertificateId {
    /// Create a certificate identifier, validating its format.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if valid_id(&s, |_| false) {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidCertificateId(s))
        }
    }

    /// Derive a fresh identifier for `farmer` at time `at`.
    pub fn generate(farmer: &FarmerId, at: &Timestamp) -> Self {
        // FarmerId's alphabet is a subset of ours and the prefix is short
        // enough that only the length bound can fail.
        let mut id = format!("CERT-{}-{}", farmer.as_str(), at.unix_millis());
        id.truncate(MAX_ID_LEN);
        Self(id)
    }

    /// Access the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of a caller that may sign registry writes.
///
/// On an in-process ledger this is an opaque name such as `admin`; on an EVM
/// ledger it is the `0x`-prefixed sender address. `:` is also accepted for
/// namespaced principals such as `evm:0xabc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Create a principal identifier, validating its format.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        if valid_id(&s, |c| c == ':') {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidPrincipalId(s))
        }
    }

    /// `admin`, the initial admin of an in-process ledger.
    pub fn default_admin() -> Self {
        Self("admin".to_string())
    }

    /// Access the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $ty {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

string_id_impls!(FarmerId);
string_id_impls!(CertificateId);
string_id_impls!(PrincipalId);
