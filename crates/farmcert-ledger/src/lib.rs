#![deny(missing_docs)]

//! # farmcert-ledger: Driving the Registry Across an Unreliable Channel
//!
//! The certificate registry lives on a ledger the service does not control.
//! Writes are submitted, sit pending for an externally imposed time, and then
//! either confirm, revert, or never report back at all. This crate models
//! that channel.
//!
//! ## Components
//!
//! - [`Ledger`]: the port. `submit_write`, `poll_status`, `read`.
//! - [`InMemoryLedger`]: hosts a [`farmcert_registry::CertificateRegistry`]
//!   in-process, with configurable confirmation latency and fault injection.
//! - `EvmLedger` (feature `evm-ledger`): a registry contract on an
//!   EVM-compatible chain, driven over JSON-RPC.
//! - [`TransactionRecord`] / [`TransactionStore`]: off-ledger bookkeeping
//!   keyed by correlation id, durable across restarts.
//! - [`TransactionSubmitter`]: records, submits, and polls in the background
//!   with bounded backoff. Callers either wait with a timeout or keep the
//!   [`SubmissionHandle`] and check later.
//!
//! ## Outcome Classes
//!
//! | Ledger says                     | Record ends in                  | Retry?               |
//! |---------------------------------|---------------------------------|----------------------|
//! | confirmed                       | `Confirmed`                     | n/a                  |
//! | reverted (with reason)          | `Failed` + `Reverted`           | never, same params   |
//! | nothing before the deadline     | `Failed` + `ChainUnavailable`   | only via reconciliation |

pub mod ledger;
pub mod record;
pub mod store;
pub mod submitter;

pub use ledger::memory::{InMemoryLedger, InMemoryLedgerConfig, Stall};
pub use ledger::{Ledger, LedgerError, LedgerOp, LedgerQuery, LedgerReadResult, PollStatus, Revert, TxRef};
pub use record::{TransactionFailure, TransactionRecord, TransactionState};
pub use store::{InMemoryTransactionStore, StoreError, TransactionStore};
pub use submitter::{PollPolicy, SubmissionHandle, SubmitError, TransactionSubmitter};

#[cfg(feature = "evm-ledger")]
pub use ledger::evm::{EvmLedger, EvmLedgerConfig};
