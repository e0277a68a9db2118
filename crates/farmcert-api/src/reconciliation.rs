//! # Reconciliation Guard
//!
//! Decides, from the registry itself, whether a write already took effect.
//!
//! Two jobs:
//!
//! 1. **Check-then-submit serialization.** Approvals for the same farmer
//!    queue on a per-farmer async mutex, so two concurrent approvals cannot
//!    both observe "no live certificate" and both submit.
//! 2. **Ambiguity resolution.** A write whose poll timed out may or may not
//!    have landed. Before anything is retried, the guard reads the registry
//!    by the write's own key (certificate id, or admin) and settles the
//!    transaction record one way or the other.

use std::sync::Arc;

use dashmap::DashMap;
use farmcert_core::{Clock, FarmerId};
use farmcert_ledger::{Ledger, LedgerError, LedgerOp, TransactionRecord, TransactionState, TransactionStore};
use farmcert_registry::{Certificate, CertificateStatus};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::orchestration::OrchestrationError;

/// Result of reconciling one transaction record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The registry shows the write; the record is now `Confirmed`.
    Landed(TransactionRecord),
    /// The registry does not show the write and it is no longer being
    /// polled; the record is now `Failed` with code `NOT_LANDED`.
    NotLanded(TransactionRecord),
    /// Not visible yet, but the ledger may still confirm it.
    InFlight(TransactionRecord),
    /// The record was already settled; nothing changed.
    Settled(TransactionRecord),
}

impl ReconcileOutcome {
    /// The record after reconciliation.
    pub fn record(&self) -> &TransactionRecord {
        match self {
            Self::Landed(r) | Self::NotLanded(r) | Self::InFlight(r) | Self::Settled(r) => r,
        }
    }

    /// Short name for logs and responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landed(_) => "landed",
            Self::NotLanded(_) => "not_landed",
            Self::InFlight(_) => "in_flight",
            Self::Settled(_) => "settled",
        }
    }
}

/// Held per-farmer lock. The map entry is dropped with the last holder.
#[derive(Debug)]
pub struct FarmerLock {
    guard: Option<OwnedMutexGuard<()>>,
    farmer_id: FarmerId,
    locks: Arc<DashMap<FarmerId, Arc<Mutex<()>>>>,
}

impl Drop for FarmerLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.farmer_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Registry-backed idempotency checks.
#[derive(Debug, Clone)]
pub struct ReconciliationGuard {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<DashMap<FarmerId, Arc<Mutex<()>>>>,
}

impl ReconciliationGuard {
    pub fn new(ledger: Arc<dyn Ledger>, store: Arc<dyn TransactionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            store,
            clock,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Serialize issuance work for one farmer. Hold the guard across the
    /// registry check and the submission.
    pub async fn lock(&self, farmer_id: &FarmerId) -> FarmerLock {
        let mutex = self
            .locks
            .entry(farmer_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        FarmerLock {
            guard: Some(mutex.lock_owned().await),
            farmer_id: farmer_id.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Farmers with a lock held or awaited.
    pub fn locked_farmers(&self) -> usize {
        self.locks.len()
    }

    /// The farmer's certificate if it is valid right now.
    pub async fn live_certificate(&self, farmer_id: &FarmerId) -> Result<Option<Certificate>, LedgerError> {
        let now = self.clock.now();
        Ok(self
            .ledger
            .latest_for_subject(farmer_id)
            .await?
            .filter(|c| c.is_valid_at(&now)))
    }

    /// Whether the registry reflects `op`.
    pub async fn landed(&self, op: &LedgerOp) -> Result<bool, LedgerError> {
        match op {
            LedgerOp::Issue(req) => Ok(self
                .ledger
                .certificate(&req.certificate_id)
                .await?
                .is_some_and(|c| {
                    c.farmer_id == req.farmer_id
                        && c.identity_hash == req.identity_hash
                        && c.eligibility_hash == req.eligibility_hash
                })),
            LedgerOp::Revoke { certificate_id, .. } => Ok(self
                .ledger
                .certificate(certificate_id)
                .await?
                .is_some_and(|c| c.status == CertificateStatus::Revoked)),
            LedgerOp::TransferAdmin { new_admin } => Ok(&self.ledger.admin().await? == new_admin),
        }
    }

    /// Settle the record stored under `correlation_id` against the registry.
    ///
    /// Returns `None` if there is no such record.
    pub async fn reconcile(&self, correlation_id: &str) -> Result<Option<ReconcileOutcome>, OrchestrationError> {
        match self.store.get(correlation_id).await? {
            Some(record) => Ok(Some(self.reconcile_record(record).await?)),
            None => Ok(None),
        }
    }

    /// Settle a record already in hand.
    pub async fn reconcile_record(&self, mut record: TransactionRecord) -> Result<ReconcileOutcome, OrchestrationError> {
        if !record.needs_reconciliation() {
            return Ok(ReconcileOutcome::Settled(record));
        }

        let landed = self.landed(&record.operation).await?;
        let outcome = if landed {
            record.reconcile(true, self.clock.now());
            self.store.put(&record).await?;
            ReconcileOutcome::Landed(record)
        } else if record.state == TransactionState::Pending {
            ReconcileOutcome::InFlight(record)
        } else {
            record.reconcile(false, self.clock.now());
            self.store.put(&record).await?;
            ReconcileOutcome::NotLanded(record)
        };

        tracing::info!(
            correlation_id = %outcome.record().correlation_id,
            op = outcome.record().operation.kind(),
            outcome = outcome.as_str(),
            "reconciled registry write"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmcert_core::{sha256_digest, CertificateId, PrincipalId, SystemClock, Timestamp};
    use farmcert_ledger::{
        InMemoryLedger, InMemoryLedgerConfig, InMemoryTransactionStore, PollPolicy, Stall, TransactionSubmitter,
    };
    use farmcert_registry::{IssueRequest, RegistryConfig};
    use std::time::Duration;

    fn admin() -> PrincipalId {
        PrincipalId::new("admin").unwrap()
    }

    fn issue(id: &str, identity: &[u8]) -> LedgerOp {
        LedgerOp::Issue(IssueRequest {
            certificate_id: CertificateId::new(id).unwrap(),
            farmer_id: FarmerId::new("F-42").unwrap(),
            farmer_name: "A. Farmer".into(),
            identity_hash: sha256_digest(identity),
            eligibility_hash: sha256_digest(b"elig"),
        })
    }

    fn setup() -> (Arc<InMemoryLedger>, Arc<InMemoryTransactionStore>, TransactionSubmitter, ReconciliationGuard) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = Arc::new(InMemoryLedger::new(
            admin(),
            RegistryConfig::default(),
            InMemoryLedgerConfig { confirmation_polls: 1 },
            clock.clone(),
        ));
        let store = Arc::new(InMemoryTransactionStore::new());
        let policy = PollPolicy {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(10),
            max_attempts: 3,
            timeout: Duration::from_secs(2),
        };
        let submitter = TransactionSubmitter::new(ledger.clone(), store.clone(), policy, clock.clone());
        let guard = ReconciliationGuard::new(ledger.clone(), store.clone(), clock);
        (ledger, store, submitter, guard)
    }

    #[tokio::test]
    async fn hidden_confirmation_reconciles_to_landed() {
        let (ledger, store, submitter, guard) = setup();
        ledger.set_stall(Stall::ApplyHidden);
        let record = submitter
            .submit("CERT-1", issue("CERT-1", b"id"), &admin())
            .await
            .unwrap()
            .resolved()
            .await;
        assert!(record.needs_reconciliation());

        let outcome = guard.reconcile("CERT-1").await.unwrap().unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Landed(_)));
        assert_eq!(
            store.get("CERT-1").await.unwrap().unwrap().state,
            TransactionState::Confirmed
        );
    }

    #[tokio::test]
    async fn held_write_reconciles_to_not_landed() {
        let (ledger, _store, submitter, guard) = setup();
        ledger.set_stall(Stall::Hold);
        submitter
            .submit("CERT-1", issue("CERT-1", b"id"), &admin())
            .await
            .unwrap()
            .resolved()
            .await;

        let outcome = guard.reconcile("CERT-1").await.unwrap().unwrap();
        match outcome {
            ReconcileOutcome::NotLanded(r) => {
                assert!(r.is_reverted());
                assert!(!r.needs_reconciliation());
            }
            other => panic!("expected NotLanded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_different_write_under_the_same_id_does_not_count() {
        let (ledger, _store, submitter, guard) = setup();
        submitter
            .submit("CERT-1", issue("CERT-1", b"id"), &admin())
            .await
            .unwrap()
            .resolved()
            .await;
        assert!(guard.landed(&issue("CERT-1", b"id")).await.unwrap());
        assert!(!guard.landed(&issue("CERT-1", b"tampered")).await.unwrap());
        assert_eq!(ledger.with_registry(|r| r.len()), 1);
    }

    #[tokio::test]
    async fn settled_records_are_left_alone() {
        let (_ledger, _store, submitter, guard) = setup();
        submitter
            .submit("CERT-1", issue("CERT-1", b"id"), &admin())
            .await
            .unwrap()
            .resolved()
            .await;
        let outcome = guard.reconcile("CERT-1").await.unwrap().unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Settled(_)));
        assert!(guard.reconcile("CERT-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_certificate_ignores_revoked() {
        let (_ledger, _store, submitter, guard) = setup();
        let farmer = FarmerId::new("F-42").unwrap();
        assert!(guard.live_certificate(&farmer).await.unwrap().is_none());

        submitter
            .submit("CERT-1", issue("CERT-1", b"id"), &admin())
            .await
            .unwrap()
            .resolved()
            .await;
        assert!(guard.live_certificate(&farmer).await.unwrap().is_some());

        let revoke = LedgerOp::Revoke {
            certificate_id: CertificateId::new("CERT-1").unwrap(),
            reason: "document fraud".into(),
        };
        submitter
            .submit(revoke.correlation_id(&Timestamp::now()), revoke.clone(), &admin())
            .await
            .unwrap()
            .resolved()
            .await;
        assert!(guard.landed(&revoke).await.unwrap());
        assert!(guard.live_certificate(&farmer).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn farmer_lock_serializes() {
        let (_ledger, _store, _submitter, guard) = setup();
        let farmer = FarmerId::new("F-42").unwrap();
        let held = guard.lock(&farmer).await;
        let g2 = guard.clone();
        let f2 = farmer.clone();
        let waiter = tokio::spawn(async move {
            let _g = g2.lock(&f2).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let (_ledger, _store, _submitter, guard) = setup();
        let f42 = FarmerId::new("F-42").unwrap();
        let f7 = FarmerId::new("F-7").unwrap();

        let a = guard.lock(&f42).await;
        let b = guard.lock(&f7).await;
        assert_eq!(guard.locked_farmers(), 2);
        drop(a);
        assert_eq!(guard.locked_farmers(), 1);

        let g2 = guard.clone();
        let f2 = f7.clone();
        let waiter = tokio::spawn(async move {
            let _g = g2.lock(&f2).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(b);
        assert_eq!(guard.locked_farmers(), 1);
        waiter.await.unwrap();
        assert_eq!(guard.locked_farmers(), 0);
    }
}
