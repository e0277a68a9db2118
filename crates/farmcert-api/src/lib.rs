//! # farmcert-api
//!
//! Axum HTTP service for the farmer certification subsystem.
//!
//! ## Pipeline
//!
//! ```text
//! upload refs ─▶ admin decide ─▶ hash documents ─▶ guard ─▶ submit issue ─▶ poll
//!                                                                  │
//! verifier ─▶ by-id / by-subject ─▶ registry read ─▶ validity at now ◀┘
//! ```
//!
//! ## Modules
//!
//! - [`orchestration`]: turns decisions into registry writes and folds the
//!   outcomes back into farmer records.
//! - [`reconciliation`]: per-farmer serialization and ambiguity resolution.
//! - [`verification`]: verifier-facing reports, `ledger_unavailable` kept
//!   distinct from invalid.
//! - [`statistics`]: certification bucket rollup.
//! - [`documents`]: document bundles and the blob store port.
//! - [`db`]: optional Postgres persistence.
//!
//! ## Middleware Stack
//!
//! ```text
//! TraceLayer ─▶ Metrics ─▶ Auth ─▶ Body limit ─▶ Handler
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod orchestration;
pub mod reconciliation;
pub mod routes;
pub mod state;
pub mod statistics;
pub mod verification;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Build the application router.
///
/// Health probes, `/metrics` and `/openapi.json` are served without
/// authentication. Everything else goes through the bearer token check.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics = state.metrics.clone();

    let api = Router::new()
        .merge(routes::certifications::router())
        .merge(routes::farmers::router())
        .merge(routes::admin::router())
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(Extension(metrics.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(auth_config))
        .with_state(state.clone());

    let unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .route("/metrics", axum::routing::get(prometheus_metrics))
        .merge(openapi::router())
        .layer(Extension(metrics))
        .with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics: Prometheus text exposition.
///
/// The farmer bucket gauge is recomputed from the farmer records on every
/// scrape.
async fn prometheus_metrics(
    State(state): State<AppState>,
    Extension(metrics): Extension<ApiMetrics>,
) -> impl IntoResponse {
    let rollup = statistics::aggregate(&state.farmers.list());
    metrics.farmers().reset();
    for (bucket, count) in rollup.stats.buckets() {
        metrics.farmers().with_label_values(&[bucket]).set(count as f64);
    }

    match metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Liveness probe. Always 200 while the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe.
///
/// Checks the database (when configured) and that the registry can be read.
/// Returns 200 "ready" or 503 with a short diagnostic.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    if let Err(e) = state.ledger.admin().await {
        tracing::warn!(ledger = state.ledger.name(), "Ledger health check failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, "ledger unreachable").into_response();
    }

    (StatusCode::OK, "ready").into_response()
}
