//! Transaction record persistence.
//!
//! [`PgTransactionStore`] implements the ledger crate's [`TransactionStore`]
//! port on the `transaction_records` table. The operation and failure are
//! stored as JSON; state, tx ref and block are plain columns so operators
//! can query them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farmcert_core::Timestamp;
use farmcert_ledger::{StoreError, TransactionRecord, TransactionState, TransactionStore, TxRef};
use sqlx::PgPool;

use super::{from_json, to_json};

/// Postgres-backed transaction store.
#[derive(Debug, Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn put(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        upsert(&self.pool, record).await.map_err(store_error)
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<TransactionRecord>, StoreError> {
        get_by_id(&self.pool, correlation_id).await.map_err(store_error)
    }

    async fn list_unresolved(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let records = list_not_confirmed(&self.pool).await.map_err(store_error)?;
        Ok(records.into_iter().filter(|r| r.needs_reconciliation()).collect())
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    StoreError(format!("transaction_records: {e}"))
}

/// Insert or replace a record.
pub async fn upsert(pool: &PgPool, record: &TransactionRecord) -> Result<(), sqlx::Error> {
    let operation = to_json(&record.operation, "transaction operation")?;
    let failure = record
        .failure
        .as_ref()
        .map(|f| to_json(f, "transaction failure"))
        .transpose()?;
    let block = record
        .block
        .map(|b| i64::try_from(b).map_err(|_| sqlx::Error::Protocol(format!("block number {b} out of range"))))
        .transpose()?;

    sqlx::query(
        "INSERT INTO transaction_records (correlation_id, operation_kind, operation, state, ledger_tx_ref,
                                          block_number, failure, last_error, poll_attempts, submitted_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (correlation_id) DO UPDATE SET
             state = EXCLUDED.state,
             ledger_tx_ref = EXCLUDED.ledger_tx_ref,
             block_number = EXCLUDED.block_number,
             failure = EXCLUDED.failure,
             last_error = EXCLUDED.last_error,
             poll_attempts = EXCLUDED.poll_attempts,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(&record.correlation_id)
    .bind(record.operation.kind())
    .bind(&operation)
    .bind(record.state.as_str())
    .bind(record.ledger_tx_ref.as_ref().map(|t| t.as_str()))
    .bind(block)
    .bind(&failure)
    .bind(&record.last_error)
    .bind(i32::try_from(record.poll_attempts).unwrap_or(i32::MAX))
    .bind(*record.submitted_at.as_datetime())
    .bind(*record.updated_at.as_datetime())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a record by correlation id.
pub async fn get_by_id(pool: &PgPool, correlation_id: &str) -> Result<Option<TransactionRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, TransactionRow>(
        "SELECT correlation_id, operation, state, ledger_tx_ref, block_number, failure, last_error,
                poll_attempts, submitted_at, updated_at
         FROM transaction_records WHERE correlation_id = $1",
    )
    .bind(correlation_id)
    .fetch_optional(pool)
    .await?;

    row.map(TransactionRow::into_record).transpose()
}

/// Every record that is not confirmed, oldest first.
async fn list_not_confirmed(pool: &PgPool) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT correlation_id, operation, state, ledger_tx_ref, block_number, failure, last_error,
                poll_attempts, submitted_at, updated_at
         FROM transaction_records WHERE state <> 'confirmed' ORDER BY submitted_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TransactionRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    correlation_id: String,
    operation: serde_json::Value,
    state: String,
    ledger_tx_ref: Option<String>,
    block_number: Option<i64>,
    failure: Option<serde_json::Value>,
    last_error: Option<String>,
    poll_attempts: i32,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_record(self) -> Result<TransactionRecord, sqlx::Error> {
        let state: TransactionState = self
            .state
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        Ok(TransactionRecord {
            operation: from_json(self.operation, "transaction operation")?,
            failure: self.failure.map(|f| from_json(f, "transaction failure")).transpose()?,
            correlation_id: self.correlation_id,
            state,
            ledger_tx_ref: self.ledger_tx_ref.map(TxRef::new),
            block: self.block_number.and_then(|b| u64::try_from(b).ok()),
            last_error: self.last_error,
            poll_attempts: u32::try_from(self.poll_attempts).unwrap_or(0),
            submitted_at: Timestamp::from_datetime(self.submitted_at),
            updated_at: Timestamp::from_datetime(self.updated_at),
        })
    }
}
