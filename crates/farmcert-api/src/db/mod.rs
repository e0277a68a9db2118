//! # Database Persistence Layer
//!
//! Optional Postgres persistence via SQLx. When `DATABASE_URL` is set, the
//! service persists transaction records and farmer records. When absent it
//! runs in-memory only.
//!
//! ## What is persisted
//!
//! - Transaction records: every registry write, keyed by correlation id.
//!   Read back at startup to reconcile writes whose outcome was never seen.
//! - Farmer records: document bundle, review outcome, certificate pointer.
//!
//! Certificates are never persisted here. The registry on the ledger is the
//! only source of truth for them.

pub mod farmers;
pub mod transactions;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only. \
                 Transaction records will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| sqlx::Error::Protocol(format!("failed to serialize {what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| sqlx::Error::Decode(format!("invalid stored {what}: {e}").into()))
}
