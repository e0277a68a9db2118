//! # farmcert-cli: Operator Command-Line Interface
//!
//! ## Subcommands
//!
//! - `hash`: compute the SHA-256 commitment of document files, in the form
//!   stored on the registry.
//! - `check`: recompute a document's commitment and compare it to one read
//!   from a certificate.
//! - `verify`: ask a running API whether a certificate is valid now.
//! - `decide`: approve or reject a farmer's application.
//! - `revoke`: revoke an issued certificate.
//! - `stats`: certification rollup.
//!
//! Argument parsing lives with each subcommand; the handlers only call into
//! `farmcert-core` or the HTTP API. Handlers return a process exit code.

pub mod certification;
pub mod client;
pub mod digest;
