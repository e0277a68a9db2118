//! # Transaction Record Store
//!
//! Durable keystore for [`TransactionRecord`]s, keyed by correlation id.
//! Reconciliation after a restart reads it back, so production deployments
//! back it with a database; the API crate provides a Postgres implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::record::TransactionRecord;

/// Store backend failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction store error: {0}")]
pub struct StoreError(pub String);

/// Persistence for transaction records.
#[async_trait]
pub trait TransactionStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace the record with this correlation id.
    async fn put(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// Fetch a record.
    async fn get(&self, correlation_id: &str) -> Result<Option<TransactionRecord>, StoreError>;

    /// Records whose outcome is unknown, oldest first.
    async fn list_unresolved(&self) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Process-local store. Contents do not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionStore {
    records: Arc<RwLock<HashMap<String, TransactionRecord>>>,
}

impl InMemoryTransactionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn put(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.correlation_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.records.read().get(correlation_id).cloned())
    }

    async fn list_unresolved(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut out: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.needs_reconciliation())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerOp;
    use crate::record::TransactionFailure;
    use farmcert_core::{PrincipalId, Timestamp};

    fn record(id: &str) -> TransactionRecord {
        TransactionRecord::submitted(
            id,
            LedgerOp::TransferAdmin {
                new_admin: PrincipalId::new("ops").unwrap(),
            },
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn put_replaces_by_correlation_id() {
        let store = InMemoryTransactionStore::new();
        let mut r = record("c-1");
        store.put(&r).await.unwrap();
        r.poll_attempts = 3;
        store.put(&r).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("c-1").await.unwrap().unwrap().poll_attempts, 3);
        assert!(store.get("c-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_unresolved_skips_settled_records() {
        let store = InMemoryTransactionStore::new();
        store.put(&record("open")).await.unwrap();

        let mut reverted = record("reverted");
        reverted.mark_failed(
            TransactionFailure::Reverted {
                code: "UNAUTHORIZED".into(),
                message: "no".into(),
            },
            Timestamp::now(),
        );
        store.put(&reverted).await.unwrap();

        let mut confirmed = record("confirmed");
        confirmed.mark_confirmed(Some(1), Timestamp::now());
        store.put(&confirmed).await.unwrap();

        let unresolved = store.list_unresolved().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].correlation_id, "open");
    }
}
