use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Member;

/// Current roster of a room, in join order
#[derive(Serialize, Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembersResponse {
    pub room_id: String,
    pub members: Vec<Member>,
}
