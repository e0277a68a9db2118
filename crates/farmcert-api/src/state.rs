//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! - **Farmers**: off-ledger application records: uploaded document
//!   references, review outcome, certificate pointer, in-flight issuance.
//! - **Ledger**: the certificate registry, behind the [`Ledger`] port.
//! - **Transaction store**: durable record of every registry write.
//! - **Orchestrator / verification**: the services route handlers call.
//!
//! Certificates themselves are never stored here. The registry on the ledger
//! is the only source of truth for them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use farmcert_core::{CertificateId, Clock, FarmerId, SystemClock};
use farmcert_ledger::{
    InMemoryLedger, InMemoryLedgerConfig, InMemoryTransactionStore, Ledger, TransactionStore,
    TransactionSubmitter, TxRef,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::documents::{DocumentBundle, DocumentStore, FsDocumentStore, InMemoryDocumentStore};
use crate::middleware::metrics::ApiMetrics;
use crate::orchestration::IssuanceOrchestrator;
use crate::verification::VerificationService;

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// All operations are synchronous (the RwLock is `parking_lot`, not `tokio::sync`)
/// because we never hold the lock across `.await` points.
#[derive(Debug)]
pub struct Store<K, T> {
    data: Arc<RwLock<HashMap<K, T>>>,
}

impl<K, T> Clone for Store<K, T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Store<K, T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: K, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &K) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &K, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        let entry = guard.get_mut(id)?;
        f(entry);
        Some(entry.clone())
    }

    /// Update a record in place, creating it with `init` first if absent.
    pub fn upsert(&self, id: &K, init: impl FnOnce() -> T, f: impl FnOnce(&mut T)) -> T {
        let mut guard = self.data.write();
        let entry = guard.entry(id.clone()).or_insert_with(init);
        f(entry);
        entry.clone()
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Default for Store<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Farmer Records -----------------------------------------------------------

/// Outcome of the admin's review of a complete application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// No decision yet.
    #[default]
    Unreviewed,
    /// Application rejected.
    Rejected,
    /// Documents verified; certificate not (or no longer) held.
    Verified,
    /// A certificate issuance for this farmer confirmed on the ledger.
    Certified,
}

impl ReviewState {
    /// Return the string representation of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreviewed => "unreviewed",
            Self::Rejected => "rejected",
            Self::Verified => "verified",
            Self::Certified => "certified",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unreviewed" => Some(Self::Unreviewed),
            "rejected" => Some(Self::Rejected),
            "verified" => Some(Self::Verified),
            "certified" => Some(Self::Certified),
            _ => None,
        }
    }
}

/// Certification bucket a farmer falls into, derived from the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FarmerStatus {
    /// Nothing uploaded yet, or complete but not reviewed.
    Pending,
    /// One of the two required documents uploaded.
    Partial,
    /// Complete application, rejected.
    Rejected,
    /// Documents verified, awaiting certification.
    Verified,
    /// Holds a certificate.
    Certified,
}

impl FarmerStatus {
    /// Every bucket, in reporting order.
    pub const ALL: [FarmerStatus; 5] = [
        Self::Certified,
        Self::Verified,
        Self::Pending,
        Self::Partial,
        Self::Rejected,
    ];

    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Rejected => "rejected",
            Self::Verified => "verified",
            Self::Certified => "certified",
        }
    }
}

impl std::fmt::Display for FarmerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issuance submitted to the ledger whose outcome the farmer record is
/// still waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightIssuance {
    /// Transaction record key (the intended certificate id).
    pub correlation_id: String,
    /// Certificate being issued.
    pub certificate_id: CertificateId,
    /// Review state to fall back to if the issuance is rejected.
    pub prior_review: ReviewState,
}

/// Off-ledger record of one farmer's application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerRecord {
    pub farmer_id: FarmerId,
    pub farmer_name: Option<String>,
    pub documents: DocumentBundle,
    pub review: ReviewState,
    pub remarks: Option<String>,
    /// Most recent certificate issued to this farmer.
    pub certificate_id: Option<CertificateId>,
    /// Ledger reference of the most recent issuance.
    pub ledger_tx_ref: Option<TxRef>,
    pub in_flight: Option<InFlightIssuance>,
    /// Last ledger failure affecting this farmer.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every change. Persistence never replaces a stored record
    /// with a lower revision.
    #[serde(default)]
    pub revision: i64,
}

impl FarmerRecord {
    /// A record with no documents and no decision.
    pub fn new(farmer_id: FarmerId, now: DateTime<Utc>) -> Self {
        Self {
            farmer_id,
            farmer_name: None,
            documents: DocumentBundle::new(),
            review: ReviewState::Unreviewed,
            remarks: None,
            certificate_id: None,
            ledger_tx_ref: None,
            in_flight: None,
            last_error: None,
            updated_at: now,
            revision: 0,
        }
    }

    /// Bucket for statistics and the status API.
    ///
    /// No documents is `pending`, one is `partial`; a complete application
    /// takes its bucket from the review outcome.
    pub fn status(&self) -> FarmerStatus {
        match self.documents.len() {
            0 => FarmerStatus::Pending,
            1 => FarmerStatus::Partial,
            _ => match self.review {
                ReviewState::Unreviewed => FarmerStatus::Pending,
                ReviewState::Rejected => FarmerStatus::Rejected,
                ReviewState::Verified => FarmerStatus::Verified,
                ReviewState::Certified if self.certificate_id.is_some() => FarmerStatus::Certified,
                ReviewState::Certified => FarmerStatus::Verified,
            },
        }
    }
}

/// Farmer records, with write-through to Postgres when configured.
#[derive(Debug, Clone)]
pub struct Farmers {
    store: Store<FarmerId, FarmerRecord>,
    db_pool: Option<PgPool>,
    clock: Arc<dyn Clock>,
}

impl Farmers {
    /// Create an empty collection.
    pub fn new(db_pool: Option<PgPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Store::new(),
            db_pool,
            clock,
        }
    }

    /// Fetch a record.
    pub fn get(&self, farmer_id: &FarmerId) -> Option<FarmerRecord> {
        self.store.get(farmer_id)
    }

    /// Snapshot of every record.
    pub fn list(&self) -> Vec<FarmerRecord> {
        self.store.list()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no farmer is known.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Modify a record, creating an empty one first if needed.
    pub async fn upsert(&self, farmer_id: &FarmerId, f: impl FnOnce(&mut FarmerRecord)) -> FarmerRecord {
        let now = self.clock.now().as_datetime().to_owned();
        let record = self.store.upsert(
            farmer_id,
            || FarmerRecord::new(farmer_id.clone(), now),
            |r| {
                f(r);
                r.updated_at = now;
                r.revision += 1;
            },
        );
        self.persist(&record).await;
        record
    }

    /// Modify an existing record. Returns `None` if the farmer is unknown.
    pub async fn update(&self, farmer_id: &FarmerId, f: impl FnOnce(&mut FarmerRecord)) -> Option<FarmerRecord> {
        let now = self.clock.now().as_datetime().to_owned();
        let record = self.store.update(farmer_id, |r| {
            f(r);
            r.updated_at = now;
            r.revision += 1;
        })?;
        self.persist(&record).await;
        Some(record)
    }

    /// Load a record without persisting it (hydration).
    fn load(&self, record: FarmerRecord) {
        self.store.insert(record.farmer_id.clone(), record);
    }

    async fn persist(&self, record: &FarmerRecord) {
        if let Some(pool) = &self.db_pool {
            if let Err(e) = crate::db::farmers::upsert(pool, record).await {
                tracing::error!(farmer_id = %record.farmer_id, error = %e, "failed to persist farmer record");
            }
        }
    }
}

// -- Application State --------------------------------------------------------

/// Backends the service is assembled from.
#[derive(Debug, Clone)]
pub struct AppComponents {
    pub ledger: Arc<dyn Ledger>,
    pub tx_store: Arc<dyn TransactionStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
    pub db_pool: Option<PgPool>,
}

impl AppComponents {
    /// In-process ledger, in-memory transaction store, document store per
    /// `config.document_root`, system clock, no database.
    pub fn in_memory(config: &AppConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = InMemoryLedger::new(
            config.admin_id.clone(),
            config.registry,
            InMemoryLedgerConfig::default(),
            Arc::clone(&clock),
        );
        let documents: Arc<dyn DocumentStore> = match &config.document_root {
            Some(root) => Arc::new(FsDocumentStore::new(root)),
            None => Arc::new(InMemoryDocumentStore::new()),
        };
        Self {
            ledger: Arc::new(ledger),
            tx_store: Arc::new(InMemoryTransactionStore::new()),
            documents,
            clock,
            db_pool: None,
        }
    }
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub farmers: Farmers,
    pub orchestrator: IssuanceOrchestrator,
    pub verification: VerificationService,
    pub ledger: Arc<dyn Ledger>,
    pub tx_store: Arc<dyn TransactionStore>,
    pub metrics: ApiMetrics,
    pub clock: Arc<dyn Clock>,
    /// PostgreSQL connection pool. `None` means in-memory only.
    pub db_pool: Option<PgPool>,
    pub config: AppConfig,
}

impl AppState {
    /// Default configuration, everything in memory.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Everything in memory, with the given configuration.
    pub fn with_config(config: AppConfig) -> Self {
        let components = AppComponents::in_memory(&config);
        Self::from_components(config, components)
    }

    /// Assemble the service from explicit backends.
    pub fn from_components(config: AppConfig, components: AppComponents) -> Self {
        let AppComponents {
            ledger,
            tx_store,
            documents,
            clock,
            db_pool,
        } = components;

        let metrics = ApiMetrics::new();
        let farmers = Farmers::new(db_pool.clone(), Arc::clone(&clock));
        let submitter = TransactionSubmitter::new(
            Arc::clone(&ledger),
            Arc::clone(&tx_store),
            config.poll,
            Arc::clone(&clock),
        );
        let orchestrator = IssuanceOrchestrator::new(
            farmers.clone(),
            documents,
            submitter,
            config.admin_id.clone(),
            config.decision_wait,
            metrics.clone(),
            Arc::clone(&clock),
        );
        let verification = VerificationService::new(Arc::clone(&ledger), Arc::clone(&clock));

        Self {
            farmers,
            orchestrator,
            verification,
            ledger,
            tx_store,
            metrics,
            clock,
            db_pool,
            config,
        }
    }

    /// Load farmer records from the database into memory (no-op without one).
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let farmers = crate::db::farmers::load_all(pool)
            .await
            .map_err(|e| format!("failed to load farmers: {e}"))?;
        let count = farmers.len();
        for record in farmers {
            self.farmers.load(record);
        }

        tracing::info!(farmers = count, "hydrated in-memory state from database");
        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
