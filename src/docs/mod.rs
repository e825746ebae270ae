use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Relay is ready", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Relay and host statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current diagnostics", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Roster of a live room
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room_id}/members",
    params(
        ("room_id" = String, Path, description = "Room id")
    ),
    responses(
        (status = 200, description = "Members in join order", body = RoomMembersResponse),
        (status = 404, description = "Room is not live", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn room_members_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        room_members_doc,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, DiagnosticsResponse, RoomMembersResponse, Member, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
