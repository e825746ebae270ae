use std::panic;
use std::sync::Arc;

use codecast::config::Config;
use codecast::{build_router, AppState};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "codecast=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting relay...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    let address = config.server_address();

    let app_state = Arc::new(AppState::new(config));
    let app_routes = build_router(app_state);

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket relay available at ws://{}/ws", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
    info!("Relay stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
