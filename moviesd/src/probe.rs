//! Probe server for the worker.
//!
//! Provides:
//! - `GET /health`: liveness, version and processed count
//! - `GET /metrics`: Prometheus text format

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ProbeConfig;
use crate::counter::ProcessedCounter;
use crate::error::{DaemonError, DaemonResult};
use crate::metrics::RelayMetrics;

// =============================================================================
// State
// =============================================================================

/// Shared state for probe handlers.
#[derive(Clone)]
pub struct ProbeState {
    pub counter: ProcessedCounter,
    pub metrics: Arc<RelayMetrics>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub processed: u64,
}

// =============================================================================
// Router
// =============================================================================

/// Create the probe router.
pub fn create_router(state: ProbeState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind and serve the probe router until `shutdown` is cancelled.
///
/// Returns the bound address.
pub async fn start_probe_server(
    config: &ProbeConfig,
    state: ProbeState,
    shutdown: CancellationToken,
) -> DaemonResult<Option<SocketAddr>> {
    let Some(port) = config.port else {
        return Ok(None);
    };

    let addr: SocketAddr = format!("{}:{}", config.host, port)
        .parse()
        .map_err(|e| DaemonError::Config(format!("Invalid probe address: {}", e)))?;
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    tokio::spawn(async move {
        let server = axum::serve(listener, create_router(state))
            .with_graceful_shutdown(shutdown.cancelled_owned());
        if let Err(e) = server.await {
            error!(error = %e, "Probe server error");
        }
    });

    info!(addr = %local_addr, "Probe server started");
    Ok(Some(local_addr))
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<ProbeState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        processed: state.counter.get(),
    })
}

async fn metrics_handler(State(state): State<ProbeState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
