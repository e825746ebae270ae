use crate::{handlers::{diagnostics, health_check, ready_check, room_members}, AppState};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes() -> Router<Arc<AppState>> {
    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/rooms/:room_id/members", get(room_members))
}
