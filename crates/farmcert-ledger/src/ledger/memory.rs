//! # In-Process Ledger
//!
//! Hosts a [`CertificateRegistry`] behind the [`Ledger`] port with the
//! behaviour of a real chain that matters to the service: writes are applied
//! only after a number of status polls, reverts carry the registry's reason,
//! and the whole thing can be made unreachable or made to stall.
//!
//! Used for development deployments and throughout the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use farmcert_core::{Clock, PrincipalId};
use farmcert_registry::{CertificateRegistry, RegistryConfig};
use parking_lot::Mutex;

use super::{Ledger, LedgerError, LedgerOp, LedgerQuery, LedgerReadResult, PollStatus, Revert, TxRef};

/// Confirmation behaviour of an [`InMemoryLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InMemoryLedgerConfig {
    /// Status polls a write sits `Pending` for before it is applied.
    /// Zero applies the write during `submit_write`.
    pub confirmation_polls: u32,
}

impl Default for InMemoryLedgerConfig {
    fn default() -> Self {
        Self {
            confirmation_polls: 1,
        }
    }
}

/// How pending writes behave while stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stall {
    /// Normal operation.
    #[default]
    Off,
    /// Writes stay pending and are not applied.
    Hold,
    /// Writes are applied on submission but every poll still says pending,
    /// the way a lost receipt looks from the outside.
    ApplyHidden,
}

#[derive(Debug)]
struct PendingTx {
    op: LedgerOp,
    signer: PrincipalId,
    polls_remaining: u32,
    outcome: Option<PollStatus>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    stall: Stall,
}

/// The registry, hosted in-process.
#[derive(Debug)]
pub struct InMemoryLedger {
    registry: Mutex<CertificateRegistry>,
    transactions: Mutex<HashMap<TxRef, PendingTx>>,
    faults: Mutex<Faults>,
    config: InMemoryLedgerConfig,
    submissions: AtomicU64,
    height: AtomicU64,
}

impl InMemoryLedger {
    /// Deploy a fresh registry administered by `admin`.
    pub fn new(
        admin: PrincipalId,
        registry_config: RegistryConfig,
        config: InMemoryLedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: Mutex::new(CertificateRegistry::new(admin, registry_config, clock)),
            transactions: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            config,
            submissions: AtomicU64::new(0),
            height: AtomicU64::new(0),
        }
    }

    /// Number of `submit_write` calls, including ones that failed.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Make every call fail with `ChainUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    /// Change how pending writes behave.
    pub fn set_stall(&self, stall: Stall) {
        self.faults.lock().stall = stall;
    }

    /// Inspect the hosted registry directly.
    pub fn with_registry<R>(&self, f: impl FnOnce(&CertificateRegistry) -> R) -> R {
        f(&self.registry.lock())
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.faults.lock().unavailable {
            Err(LedgerError::ChainUnavailable {
                ledger: self.name().to_string(),
                detail: "injected outage".into(),
            })
        } else {
            Ok(())
        }
    }

    /// Apply a write to the registry and mint a block.
    fn apply(&self, op: &LedgerOp, signer: &PrincipalId) -> PollStatus {
        let mut registry = self.registry.lock();
        let result = match op {
            LedgerOp::Issue(req) => registry.issue(signer, req.clone()).map(|_| ()),
            LedgerOp::Revoke {
                certificate_id,
                reason,
            } => registry.revoke(signer, certificate_id, reason).map(|_| ()),
            LedgerOp::TransferAdmin { new_admin } => {
                registry.transfer_admin(signer, new_admin.clone())
            }
        };
        match result {
            Ok(()) => PollStatus::Confirmed {
                block: Some(self.height.fetch_add(1, Ordering::SeqCst) + 1),
            },
            Err(err) => {
                tracing::debug!(op = op.kind(), error = %err, "in-memory ledger reverted write");
                PollStatus::Reverted(Revert::from(&err))
            }
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn submit_write(&self, op: &LedgerOp, signer: &PrincipalId) -> Result<TxRef, LedgerError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_available()?;

        let tx = TxRef::new(format!("0xmem{n:060x}"));
        let stall = self.faults.lock().stall;
        let outcome = if stall == Stall::ApplyHidden || self.config.confirmation_polls == 0 {
            Some(self.apply(op, signer))
        } else {
            None
        };
        self.transactions.lock().insert(
            tx.clone(),
            PendingTx {
                op: op.clone(),
                signer: signer.clone(),
                polls_remaining: self.config.confirmation_polls,
                outcome,
            },
        );
        Ok(tx)
    }

    async fn poll_status(&self, tx: &TxRef) -> Result<PollStatus, LedgerError> {
        self.check_available()?;
        let stall = self.faults.lock().stall;

        let mut transactions = self.transactions.lock();
        let pending = transactions
            .get_mut(tx)
            .ok_or_else(|| LedgerError::UnknownTransaction(tx.clone()))?;

        match stall {
            Stall::Hold | Stall::ApplyHidden => return Ok(PollStatus::Pending),
            Stall::Off => {}
        }

        if pending.outcome.is_none() {
            pending.polls_remaining = pending.polls_remaining.saturating_sub(1);
            if pending.polls_remaining > 0 {
                return Ok(PollStatus::Pending);
            }
            pending.outcome = Some(self.apply(&pending.op, &pending.signer));
        }
        Ok(pending.outcome.clone().unwrap_or(PollStatus::Pending))
    }

    async fn read(&self, query: &LedgerQuery) -> Result<LedgerReadResult, LedgerError> {
        self.check_available()?;
        let registry = self.registry.lock();
        Ok(match query {
            LedgerQuery::CertificateById(id) => LedgerReadResult::Certificate(registry.get(id).cloned()),
            LedgerQuery::LatestForSubject(farmer) => {
                LedgerReadResult::Certificate(registry.latest_for_subject(farmer).cloned())
            }
            LedgerQuery::Admin => LedgerReadResult::Admin(registry.admin().clone()),
        })
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
