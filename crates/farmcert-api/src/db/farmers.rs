//! Farmer record persistence.
//!
//! All functions take a `&PgPool` and operate on the `farmers` table. The
//! document bundle and any in-flight issuance are stored as JSON.

use chrono::{DateTime, Utc};
use farmcert_core::{CertificateId, FarmerId};
use farmcert_ledger::TxRef;
use sqlx::PgPool;

use super::{from_json, to_json};
use crate::state::{FarmerRecord, ReviewState};

/// Insert or replace a farmer record.
///
/// A stored row with a higher revision is kept, so snapshots that reach the
/// database out of order cannot roll a record back.
pub async fn upsert(pool: &PgPool, record: &FarmerRecord) -> Result<(), sqlx::Error> {
    let documents = to_json(&record.documents, "document bundle")?;
    let in_flight = record
        .in_flight
        .as_ref()
        .map(|f| to_json(f, "in-flight issuance"))
        .transpose()?;

    sqlx::query(
        "INSERT INTO farmers (farmer_id, farmer_name, documents, review, remarks, certificate_id,
                              ledger_tx_ref, in_flight, last_error, updated_at, revision)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (farmer_id) DO UPDATE SET
             farmer_name = EXCLUDED.farmer_name,
             documents = EXCLUDED.documents,
             review = EXCLUDED.review,
             remarks = EXCLUDED.remarks,
             certificate_id = EXCLUDED.certificate_id,
             ledger_tx_ref = EXCLUDED.ledger_tx_ref,
             in_flight = EXCLUDED.in_flight,
             last_error = EXCLUDED.last_error,
             updated_at = EXCLUDED.updated_at,
             revision = EXCLUDED.revision
         WHERE farmers.revision < EXCLUDED.revision",
    )
    .bind(record.farmer_id.as_str())
    .bind(&record.farmer_name)
    .bind(&documents)
    .bind(record.review.as_str())
    .bind(&record.remarks)
    .bind(record.certificate_id.as_ref().map(|c| c.as_str()))
    .bind(record.ledger_tx_ref.as_ref().map(|t| t.as_str()))
    .bind(&in_flight)
    .bind(&record.last_error)
    .bind(record.updated_at)
    .bind(record.revision)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every farmer record into memory on startup.
pub async fn load_all(pool: &PgPool) -> Result<Vec<FarmerRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, FarmerRow>(
        "SELECT farmer_id, farmer_name, documents, review, remarks, certificate_id, ledger_tx_ref,
                in_flight, last_error, updated_at, revision
         FROM farmers ORDER BY farmer_id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(FarmerRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct FarmerRow {
    farmer_id: String,
    farmer_name: Option<String>,
    documents: serde_json::Value,
    review: String,
    remarks: Option<String>,
    certificate_id: Option<String>,
    ledger_tx_ref: Option<String>,
    in_flight: Option<serde_json::Value>,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
    revision: i64,
}

impl FarmerRow {
    fn into_record(self) -> Result<FarmerRecord, sqlx::Error> {
        let decode = |what: &str, e: farmcert_core::ValidationError| {
            sqlx::Error::Decode(format!("invalid stored {what}: {e}").into())
        };
        let review = ReviewState::parse(&self.review)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown review state: {}", self.review).into()))?;

        Ok(FarmerRecord {
            farmer_id: FarmerId::new(self.farmer_id).map_err(|e| decode("farmer id", e))?,
            farmer_name: self.farmer_name,
            documents: from_json(self.documents, "document bundle")?,
            review,
            remarks: self.remarks,
            certificate_id: self
                .certificate_id
                .map(CertificateId::new)
                .transpose()
                .map_err(|e| decode("certificate id", e))?,
            ledger_tx_ref: self.ledger_tx_ref.map(TxRef::new),
            in_flight: self.in_flight.map(|f| from_json(f, "in-flight issuance")).transpose()?,
            last_error: self.last_error,
            updated_at: self.updated_at,
            revision: self.revision,
        })
    }
}
