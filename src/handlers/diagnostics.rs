use crate::{models::DiagnosticsResponse, AppState};
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Relay and host statistics
pub async fn diagnostics(State(app_state): State<Arc<AppState>>) -> (StatusCode, Json<DiagnosticsResponse>) {
    let stats = app_state.registry.stats().await;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}, Awaiting sync: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.connections,
        stats.rooms,
        stats.awaiting_sync
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: stats.connections as u32,
            n_rooms: stats.rooms as u32,
            n_awaiting_sync: stats.awaiting_sync as u32,
            uptime_secs: app_state.started_at.elapsed().as_secs(),
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
