//! HTTP API for health checks, detector status and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use detector_lib::{HealthRegistry, StatusBoard, StatusSnapshot};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ConfigSummary;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub status: StatusBoard,
    pub config: ConfigSummary,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, status: StatusBoard, config: ConfigSummary) -> Self {
        Self {
            health_registry,
            status,
            config,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    config: &'a ConfigSummary,
    state: StatusSnapshot,
}

/// Liveness: always 200 while the process serves requests; body shows
/// per-collaborator health
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (StatusCode::OK, Json(health))
}

/// Readiness check response - returns 200 once the detection loop runs, 503 before
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Effective configuration and last-known detector state
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.status.snapshot().await;

    Json(StatusResponse {
        config: &state.config,
        state: snapshot,
    })
    .into_response()
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
