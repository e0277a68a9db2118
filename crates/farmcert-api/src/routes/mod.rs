//! # API Route Modules
//!
//! - `certifications`: admin decisions, revocation, transaction status,
//!   reconciliation, verification queries and statistics.
//! - `farmers`: document intake and application status.
//! - `admin`: registry admin status and transfer.

pub mod admin;
pub mod certifications;
pub mod farmers;
