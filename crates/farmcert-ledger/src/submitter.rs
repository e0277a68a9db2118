//! # Transaction Submitter / Poller
//!
//! `submit` records the write, hands it to the ledger, and returns at once.
//! A background task polls for the outcome with exponential backoff, bounded
//! both by an attempt count and an overall deadline, and publishes every
//! change of the record through a `tokio::sync::watch` channel.
//!
//! Callers choose how long to wait. [`SubmissionHandle::wait`] blocks up to a
//! timeout and returns whatever the record says at that point;
//! [`SubmissionHandle::current`] never blocks. A caller-side timeout only
//! stops *waiting*: the write is already with the ledger and polling carries
//! on.

use std::sync::Arc;
use std::time::Duration;

use farmcert_core::{Clock, PrincipalId};
use thiserror::Error;
use tokio::sync::watch;

use crate::ledger::{Ledger, LedgerError, LedgerOp, PollStatus};
use crate::record::{TransactionFailure, TransactionRecord, TransactionState};
use crate::store::{StoreError, TransactionStore};

/// Backoff and deadline for confirmation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the first poll.
    pub initial_interval: Duration,
    /// Upper bound on the delay between polls.
    pub max_interval: Duration,
    /// Maximum number of polls.
    pub max_attempts: u32,
    /// Overall budget from submission to giving up.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    /// 2s doubling to 15s, at most 40 polls, five minutes overall.
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(15),
            max_attempts: 40,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Submission failed before the ledger was contacted.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The record could not be persisted, so nothing was sent.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Live view of one submission.
#[derive(Debug, Clone)]
pub struct SubmissionHandle {
    rx: watch::Receiver<TransactionRecord>,
}

impl SubmissionHandle {
    fn settled(record: TransactionRecord) -> Self {
        let (_tx, rx) = watch::channel(record);
        Self { rx }
    }

    /// Correlation id of the record.
    pub fn correlation_id(&self) -> String {
        self.rx.borrow().correlation_id.clone()
    }

    /// Snapshot of the record right now.
    pub fn current(&self) -> TransactionRecord {
        self.rx.borrow().clone()
    }

    /// Wait up to `timeout` for the record to resolve, then return it.
    ///
    /// The returned record may still be `Submitted` or `Pending`.
    pub async fn wait(&mut self, timeout: Duration) -> TransactionRecord {
        if !self.rx.borrow().is_resolved() {
            let _ = tokio::time::timeout(timeout, self.rx.wait_for(|r| r.is_resolved())).await;
        }
        self.current()
    }

    /// Wait for resolution without a caller-side timeout. The poller's own
    /// deadline still applies.
    pub async fn resolved(mut self) -> TransactionRecord {
        let _ = self.rx.wait_for(|r| r.is_resolved()).await;
        self.current()
    }
}

/// Submits registry writes and tracks them to resolution.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn TransactionStore>,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
}

impl TransactionSubmitter {
    /// Create a submitter.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn TransactionStore>,
        policy: PollPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            store,
            policy,
            clock,
        }
    }

    /// The ledger writes go to.
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// The polling policy.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Record `op` under `correlation_id`, send it to the ledger, and start
    /// polling in the background.
    ///
    /// Ledger errors do not fail this call; they are reflected in the record.
    /// A refused submission ends `Failed(Reverted)`, an unreachable ledger
    /// ends `Failed(ChainUnavailable)` because the request may have arrived.
    pub async fn submit(
        &self,
        correlation_id: impl Into<String>,
        op: LedgerOp,
        signer: &PrincipalId,
    ) -> Result<SubmissionHandle, SubmitError> {
        let mut record = TransactionRecord::submitted(correlation_id, op, self.clock.now());
        self.store.put(&record).await?;

        match self.ledger.submit_write(&record.operation, signer).await {
            Ok(tx) => {
                tracing::info!(
                    correlation_id = %record.correlation_id,
                    op = record.operation.kind(),
                    tx_ref = %tx,
                    ledger = self.ledger.name(),
                    "registry write submitted"
                );
                record.mark_pending(tx, self.clock.now());
                self.persist(&record).await;
                Ok(self.spawn_poller(record))
            }
            Err(err) => {
                let failure = match &err {
                    LedgerError::Rejected(msg) => TransactionFailure::Reverted {
                        code: "REJECTED".into(),
                        message: msg.clone(),
                    },
                    other => TransactionFailure::ChainUnavailable {
                        detail: other.to_string(),
                    },
                };
                tracing::warn!(
                    correlation_id = %record.correlation_id,
                    op = record.operation.kind(),
                    error = %err,
                    "registry write submission failed"
                );
                record.mark_failed(failure, self.clock.now());
                self.persist(&record).await;
                Ok(SubmissionHandle::settled(record))
            }
        }
    }

    /// Resume polling a record loaded from the store after a restart.
    ///
    /// Only `Pending` records with a ledger reference can be polled; anything
    /// else is returned as-is for reconciliation to handle.
    pub fn resume(&self, record: TransactionRecord) -> SubmissionHandle {
        if record.state == TransactionState::Pending && record.ledger_tx_ref.is_some() {
            tracing::info!(correlation_id = %record.correlation_id, "resuming confirmation polling");
            self.spawn_poller(record)
        } else {
            SubmissionHandle::settled(record)
        }
    }

    fn spawn_poller(&self, record: TransactionRecord) -> SubmissionHandle {
        let (tx, rx) = watch::channel(record.clone());
        let this = self.clone();
        tokio::spawn(async move {
            this.poll_until_resolved(record, tx).await;
        });
        SubmissionHandle { rx }
    }

    async fn poll_until_resolved(
        &self,
        mut record: TransactionRecord,
        sender: watch::Sender<TransactionRecord>,
    ) {
        let Some(tx_ref) = record.ledger_tx_ref.clone() else {
            return;
        };
        let deadline = tokio::time::Instant::now() + self.policy.timeout;
        let mut interval = self.policy.initial_interval;
        let mut attempts = 0u32;

        while attempts < self.policy.max_attempts {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            attempts += 1;
            record.poll_attempts += 1;

            match tokio::time::timeout_at(deadline, self.ledger.poll_status(&tx_ref)).await {
                Err(_) => break,
                Ok(Ok(PollStatus::Pending)) => {}
                Ok(Ok(PollStatus::Confirmed { block })) => {
                    record.mark_confirmed(block, self.clock.now());
                    tracing::info!(
                        correlation_id = %record.correlation_id,
                        tx_ref = %tx_ref,
                        block = ?block,
                        attempts,
                        "registry write confirmed"
                    );
                }
                Ok(Ok(PollStatus::Reverted(revert))) => {
                    tracing::warn!(
                        correlation_id = %record.correlation_id,
                        tx_ref = %tx_ref,
                        revert = %revert,
                        "registry write reverted"
                    );
                    record.mark_failed(revert.into(), self.clock.now());
                }
                Ok(Err(err)) => {
                    tracing::debug!(
                        correlation_id = %record.correlation_id,
                        error = %err,
                        attempt = attempts,
                        "transient poll failure"
                    );
                    record.last_error = Some(err.to_string());
                }
            }

            if record.is_resolved() {
                self.persist(&record).await;
                sender.send_replace(record);
                return;
            }
            sender.send_replace(record.clone());
            interval = (interval * 2).min(self.policy.max_interval);
        }

        let detail = format!(
            "no confirmation after {attempts} polls within {}s{}",
            self.policy.timeout.as_secs(),
            record
                .last_error
                .as_deref()
                .map(|e| format!(" (last error: {e})"))
                .unwrap_or_default()
        );
        tracing::warn!(
            correlation_id = %record.correlation_id,
            tx_ref = %tx_ref,
            %detail,
            "registry write outcome unknown; reconciliation required"
        );
        record.mark_failed(TransactionFailure::ChainUnavailable { detail }, self.clock.now());
        self.persist(&record).await;
        sender.send_replace(record);
    }

    async fn persist(&self, record: &TransactionRecord) {
        if let Err(err) = self.store.put(record).await {
            tracing::error!(
                correlation_id = %record.correlation_id,
                error = %err,
                "failed to persist transaction record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{InMemoryLedger, InMemoryLedgerConfig, Stall};
    use crate::store::InMemoryTransactionStore;
    use farmcert_core::{sha256_digest, CertificateId, FarmerId, SystemClock};
    use farmcert_registry::{IssueRequest, RegistryConfig};

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            max_attempts,
            timeout: Duration::from_secs(5),
        }
    }

    fn setup(polls: u32, policy: PollPolicy) -> (Arc<InMemoryLedger>, InMemoryTransactionStore, TransactionSubmitter) {
        let ledger = Arc::new(InMemoryLedger::new(
            admin(),
            RegistryConfig::default(),
            InMemoryLedgerConfig {
                confirmation_polls: polls,
            },
            Arc::new(SystemClock),
        ));
        let store = InMemoryTransactionStore::new();
        let submitter = TransactionSubmitter::new(
            ledger.clone(),
            Arc::new(store.clone()),
            policy,
            Arc::new(SystemClock),
        );
        (ledger, store, submitter)
    }

    fn admin() -> PrincipalId {
        PrincipalId::new("admin").unwrap()
    }

    fn issue(id: &str) -> LedgerOp {
        LedgerOp::Issue(IssueRequest {
            certificate_id: CertificateId::new(id).unwrap(),
            farmer_id: FarmerId::new("F-42").unwrap(),
            farmer_name: "A. Farmer".into(),
            identity_hash: sha256_digest(b"id"),
            eligibility_hash: sha256_digest(b"elig"),
        })
    }

    #[tokio::test]
    async fn confirmed_write_is_recorded() {
        let (_ledger, store, submitter) = setup(2, fast_policy(10));
        let handle = submitter.submit("CERT-1", issue("CERT-1"), &admin()).await.unwrap();
        let record = handle.resolved().await;

        assert_eq!(record.state, TransactionState::Confirmed);
        assert!(record.ledger_tx_ref.is_some());
        assert_eq!(record.poll_attempts, 2);
        let stored = store.get("CERT-1").await.unwrap().unwrap();
        assert_eq!(stored.state, TransactionState::Confirmed);
    }

    #[tokio::test]
    async fn revert_is_permanent_failure() {
        let (_ledger, _store, submitter) = setup(1, fast_policy(10));
        let handle = submitter
            .submit("CERT-1", issue("CERT-1"), &PrincipalId::new("mallory").unwrap())
            .await
            .unwrap();
        let record = handle.resolved().await;

        assert_eq!(record.state, TransactionState::Failed);
        assert!(record.is_reverted());
        assert!(!record.needs_reconciliation());
        assert!(matches!(
            record.failure,
            Some(TransactionFailure::Reverted { ref code, .. }) if code == "UNAUTHORIZED"
        ));
    }

    #[tokio::test]
    async fn exhausted_polling_is_ambiguous() {
        let (ledger, store, submitter) = setup(1, fast_policy(3));
        ledger.set_stall(Stall::Hold);
        let record = submitter
            .submit("CERT-1", issue("CERT-1"), &admin())
            .await
            .unwrap()
            .resolved()
            .await;

        assert_eq!(record.state, TransactionState::Failed);
        assert!(record.needs_reconciliation());
        assert_eq!(record.poll_attempts, 3);
        assert!(store.get("CERT-1").await.unwrap().unwrap().needs_reconciliation());
    }

    #[tokio::test]
    async fn outage_at_submission_is_ambiguous() {
        let (ledger, _store, submitter) = setup(1, fast_policy(3));
        ledger.set_unavailable(true);
        let handle = submitter.submit("CERT-1", issue("CERT-1"), &admin()).await.unwrap();
        let record = handle.current();
        assert_eq!(record.state, TransactionState::Failed);
        assert!(record.ledger_tx_ref.is_none());
        assert!(matches!(record.failure, Some(TransactionFailure::ChainUnavailable { .. })));
    }

    #[tokio::test]
    async fn caller_timeout_does_not_stop_polling() {
        let (ledger, _store, submitter) = setup(1, fast_policy(1_000));
        ledger.set_stall(Stall::Hold);
        let mut handle = submitter.submit("CERT-1", issue("CERT-1"), &admin()).await.unwrap();

        let snapshot = handle.wait(Duration::from_millis(40)).await;
        assert_eq!(snapshot.state, TransactionState::Pending);

        ledger.set_stall(Stall::Off);
        let record = handle.resolved().await;
        assert_eq!(record.state, TransactionState::Confirmed);
        assert_eq!(ledger.with_registry(|r| r.len()), 1);
    }

    #[tokio::test]
    async fn resume_picks_up_pending_record() {
        let (ledger, store, submitter) = setup(1, fast_policy(1_000));
        ledger.set_stall(Stall::Hold);
        let handle = submitter.submit("CERT-1", issue("CERT-1"), &admin()).await.unwrap();
        let pending = handle.current();
        assert_eq!(pending.state, TransactionState::Pending);

        // A second submitter over the same ledger and store stands in for a
        // restarted process.
        let restarted = TransactionSubmitter::new(
            ledger.clone(),
            Arc::new(store.clone()),
            fast_policy(10),
            Arc::new(SystemClock),
        );
        ledger.set_stall(Stall::Off);
        let record = restarted.resume(pending).resolved().await;
        assert_eq!(record.state, TransactionState::Confirmed);
    }
}
