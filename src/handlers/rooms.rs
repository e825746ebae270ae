use crate::{models::{ErrorResponse, RoomMembersResponse}, AppState};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::debug;

/// Roster of a live room
pub async fn room_members(
    State(app_state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<(StatusCode, Json<RoomMembersResponse>), (StatusCode, Json<ErrorResponse>)> {
    match app_state.registry.members(&room_id).await {
        Some(members) => Ok((StatusCode::OK, Json(RoomMembersResponse { room_id, members }))),
        None => {
            debug!("Room {} requested but not live", room_id);
            Err(ErrorResponse::with_status(
                StatusCode::NOT_FOUND,
                format!("Room {} not found", room_id),
            ))
        }
    }
}
