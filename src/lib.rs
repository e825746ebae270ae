//! Collaborative code-editing rooms.
//!
//! The relay (`websocket`, `ws`) keeps room membership and fans edits out to
//! room members. The client core (`client`) joins a room over one WebSocket,
//! keeps a local editing surface in sync, and hands the document to a
//! compilation service (`clients`).

pub mod client;
pub mod clients;
pub mod config;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod utils;
pub mod websocket;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use axum::{http::HeaderValue, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::routes::create_api_routes;
use crate::websocket::websocket_handler;
use crate::ws::registry::RoomRegistry;

/// State shared by every HTTP and WebSocket handler.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<RoomRegistry>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(RoomRegistry::new()),
            started_at: Instant::now(),
        }
    }
}

/// The relay's full router: `/api`, `/ws` and the Swagger UI.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        // Mount API routes
        .nest("/api", create_api_routes())
        .route("/ws", get(websocket_handler))
        .with_state(state)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .into_iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
}
