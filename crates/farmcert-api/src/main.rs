//! farmcert API server.
//!
//! Startup order: configuration, logging, ledger, database, state hydration,
//! reconciliation of unresolved registry writes, then serving. Traffic is
//! accepted only after every write whose outcome was unknown at shutdown has
//! been settled or resumed.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use farmcert_api::config::{AppConfig, LedgerBackend};
use farmcert_api::db::transactions::PgTransactionStore;
use farmcert_api::state::{AppComponents, AppState};
use farmcert_ledger::Ledger;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = AppConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_json).unwrap_or(false));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: AppConfig) -> Result<(), String> {
    tracing::info!(?config, "starting farmcert-api");

    let mut components = AppComponents::in_memory(&config);
    if let Some(ledger) = external_ledger(&config)? {
        components.ledger = ledger;
    }
    tracing::info!(ledger = components.ledger.name(), "registry ledger selected");

    let pool = farmcert_api::db::init_pool()
        .await
        .map_err(|e| format!("database initialization failed: {e}"))?;
    if let Some(pool) = &pool {
        components.tx_store = Arc::new(PgTransactionStore::new(pool.clone()));
    }
    components.db_pool = pool;

    let port = config.port;
    let state = AppState::from_components(config, components);
    state.hydrate_from_db().await?;

    let recovered = state
        .orchestrator
        .recover_unresolved()
        .await
        .map_err(|e| format!("startup reconciliation failed: {e}"))?;
    tracing::info!(records = recovered, "unresolved registry writes handled");

    let app = farmcert_api::app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    tracing::info!("farmcert-api listening on {addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"))
}

/// The configured non-memory ledger, if any.
fn external_ledger(config: &AppConfig) -> Result<Option<Arc<dyn Ledger>>, String> {
    match &config.ledger {
        LedgerBackend::Memory => {
            tracing::warn!("in-process ledger: issued certificates will not survive a restart");
            Ok(None)
        }
        #[cfg(feature = "evm-ledger")]
        LedgerBackend::Evm(evm) => {
            use farmcert_ledger::{EvmLedger, EvmLedgerConfig};

            let ledger = EvmLedger::new(EvmLedgerConfig::new(
                evm.rpc_url.as_str(),
                evm.contract_address.clone(),
                format!("evm:{}", evm.chain_id),
                evm.chain_id,
            ))
            .map_err(|e| format!("EVM ledger configuration rejected: {e}"))?;
            Ok(Some(Arc::new(ledger)))
        }
        #[cfg(not(feature = "evm-ledger"))]
        LedgerBackend::Evm(_) => {
            Err("FARMCERT_LEDGER=evm requires a build with the `evm-ledger` feature".to_string())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
