//! HTTP API: dashboard page, results, incidents, health checks and
//! Prometheus metrics

use crate::state::AppState;
use crate::view;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use detector_lib::{cloud::IncidentPanel, health::ComponentStatus};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Dashboard page
async fn index(State(state): State<Arc<AppState>>) -> Response {
    match view::render_page(&state).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render dashboard page");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render dashboard").into_response()
        }
    }
}

/// Latest analysis - 503 until the first refresh has succeeded
async fn results(State(state): State<Arc<AppState>>) -> Response {
    match state.latest().await {
        Some(snapshot) => (StatusCode::OK, Json(snapshot.to_response())).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "No results yet" })),
        )
            .into_response(),
    }
}

/// Incident panel - 503 unless the last fetch succeeded
async fn incidents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let panel = state.panel().await;
    let status_code = match panel {
        IncidentPanel::Available { .. } => StatusCode::OK,
        IncidentPanel::Disabled | IncidentPanel::Unavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (status_code, Json(panel))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Serving stale or partial data
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/v1/results", get(results))
        .route("/api/v1/incidents", get(incidents))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until the shutdown channel fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting dashboard server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
