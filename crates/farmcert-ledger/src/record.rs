//! # Transaction Records
//!
//! Off-ledger bookkeeping for every registry write. A record is created in
//! `Submitted` before the ledger sees anything, so a crash between "decided
//! to write" and "learned the outcome" always leaves a trace to reconcile.
//!
//! ```text
//! Submitted ──▶ Pending ──▶ Confirmed
//!     │            │
//!     │            ├──▶ Failed(Reverted)          permanent
//!     └────────────┴──▶ Failed(ChainUnavailable)  ambiguous: may have landed
//! ```

use farmcert_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::ledger::{LedgerOp, Revert, TxRef};

/// Where a write stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Recorded locally; not yet accepted by the ledger.
    Submitted,
    /// Accepted by the ledger; awaiting confirmation.
    Pending,
    /// Applied on the ledger.
    Confirmed,
    /// Did not confirm. See [`TransactionFailure`] for whether that is final.
    Failed,
}

impl TransactionState {
    /// Return the string representation of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown transaction state: {other}")),
        }
    }
}

/// Why a write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionFailure {
    /// The registry rejected the write. Never retried with the same parameters.
    Reverted {
        /// Machine-readable revert code.
        code: String,
        /// Ledger-supplied reason.
        message: String,
    },
    /// No confirmation and no rejection before the deadline. The write may or
    /// may not have landed.
    ChainUnavailable {
        /// Last transport error or timeout description.
        detail: String,
    },
}

impl TransactionFailure {
    /// Whether the outcome is unknown and must be reconciled before any retry.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. })
    }
}

impl std::fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reverted { code, message } => write!(f, "reverted ({code}): {message}"),
            Self::ChainUnavailable { detail } => write!(f, "chain unavailable: {detail}"),
        }
    }
}

impl From<Revert> for TransactionFailure {
    fn from(revert: Revert) -> Self {
        Self::Reverted {
            code: revert.code,
            message: revert.message,
        }
    }
}

/// Off-ledger record of one registry write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Key of the record. For issuance, the intended certificate id.
    pub correlation_id: String,
    /// The write.
    pub operation: LedgerOp,
    /// When the record was created.
    pub submitted_at: Timestamp,
    /// Last state change.
    pub updated_at: Timestamp,
    /// Current state.
    pub state: TransactionState,
    /// Ledger reference, once the ledger accepted the write.
    pub ledger_tx_ref: Option<TxRef>,
    /// Block the write confirmed in, where the ledger has blocks.
    pub block: Option<u64>,
    /// Failure details when `state` is `Failed`.
    pub failure: Option<TransactionFailure>,
    /// Most recent error seen, including transient poll errors.
    pub last_error: Option<String>,
    /// Status polls performed.
    pub poll_attempts: u32,
}

impl TransactionRecord {
    /// A new record in `Submitted`.
    pub fn submitted(correlation_id: impl Into<String>, operation: LedgerOp, at: Timestamp) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation,
            submitted_at: at,
            updated_at: at,
            state: TransactionState::Submitted,
            ledger_tx_ref: None,
            block: None,
            failure: None,
            last_error: None,
            poll_attempts: 0,
        }
    }

    /// Confirmed or failed.
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, TransactionState::Confirmed | TransactionState::Failed)
    }

    /// Whether nobody knows yet if this write took effect: still in flight,
    /// or failed ambiguously.
    pub fn needs_reconciliation(&self) -> bool {
        match self.state {
            TransactionState::Submitted | TransactionState::Pending => true,
            TransactionState::Confirmed => false,
            TransactionState::Failed => self.failure.as_ref().map_or(true, |f| f.is_ambiguous()),
        }
    }

    /// Whether the record ended in a permanent rejection.
    pub fn is_reverted(&self) -> bool {
        matches!(self.failure, Some(TransactionFailure::Reverted { .. }))
    }

    pub(crate) fn mark_pending(&mut self, tx: TxRef, at: Timestamp) {
        self.state = TransactionState::Pending;
        self.ledger_tx_ref = Some(tx);
        self.updated_at = at;
    }

    pub(crate) fn mark_confirmed(&mut self, block: Option<u64>, at: Timestamp) {
        self.state = TransactionState::Confirmed;
        self.block = block;
        self.failure = None;
        self.updated_at = at;
    }

    pub(crate) fn mark_failed(&mut self, failure: TransactionFailure, at: Timestamp) {
        self.state = TransactionState::Failed;
        self.last_error = Some(failure.to_string());
        self.failure = Some(failure);
        self.updated_at = at;
    }

    /// Resolve an ambiguous record from what reconciliation found on the ledger.
    ///
    /// `landed` means the intended write is visible in registry state.
    pub fn reconcile(&mut self, landed: bool, at: Timestamp) {
        if landed {
            self.mark_confirmed(self.block, at);
        } else {
            self.mark_failed(
                TransactionFailure::Reverted {
                    code: "NOT_LANDED".into(),
                    message: "reconciliation found no trace of this write on the ledger".into(),
                },
                at,
            );
        }
    }
}
