#![deny(missing_docs)]

//! # farmcert-core: Foundational Types for Farmer Certification
//!
//! This crate defines the types every other crate in the workspace depends
//! on. It has no internal crate dependencies.
//!
//! ## Design Principles
//!
//! 1. **Commitments, not documents.** A [`ContentDigest`] is the only form in
//!    which an identity or eligibility document ever leaves the document
//!    store. Nothing downstream sees the raw bytes.
//!
//! 2. **Newtype wrappers for identifiers.** You cannot pass a [`FarmerId`]
//!    where a [`CertificateId`] is expected. String identifiers are validated
//!    at construction time.
//!
//! 3. **Time is injected.** Validity is a pure function of `now`, so every
//!    component that asks "what time is it" takes a [`Clock`]. Tests drive a
//!    [`ManualClock`] across expiry boundaries without sleeping.

pub mod digest;
pub mod error;
pub mod identity;
pub mod temporal;

pub use digest::{sha256_digest, ContentDigest};
pub use error::ValidationError;
pub use identity::{CertificateId, FarmerId, PrincipalId};
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
