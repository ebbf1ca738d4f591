//! HTTP API for health checks, status, and monitoring

use crate::chain::ChainProvider;
use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::state::{RelayStats, RelayStore};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RelayStore>,
    pub source: ChainProvider,
    pub destination: ChainProvider,
    pub run_id: Uuid,
    pub started_at: Instant,
}

/// Routes served by the API
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store and both chains reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.health_check().await.is_ok();
    let source = state.source.health_check().await;
    let destination = state.destination.health_check().await;
    let ready = store && source && destination;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            store,
            source,
            destination,
        }),
    )
}

/// Get relayer status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        run_id: state.run_id.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        source_chain: state.source.tag().to_string(),
        destination_chain: state.destination.tag().to_string(),
    })
}

/// Get relay statistics
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(RelayStats::default())),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    source: bool,
    destination: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    run_id: String,
    uptime_seconds: u64,
    source_chain: String,
    destination_chain: String,
}
