use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::debug;

use crate::models::{HealthResponse, ReadyResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        service: app_state.config.service_name.clone(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(app_state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    debug!("Readiness check requested");
    let stats = app_state.registry.stats().await;
    Json(ReadyResponse {
        status: "ok".to_string(),
        message: "Relay is accepting connections".to_string(),
        rooms: stats.rooms,
        connections: stats.connections,
    })
}
