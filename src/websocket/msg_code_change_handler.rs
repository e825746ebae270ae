use tracing::debug;

use crate::error::ProtocolViolation;
use crate::models::{CodeChangeMessage, Event};
use crate::ws::registry::RoomRegistry;

/// Handle CodeChangeMessage - fan the edit out to the rest of the room
pub async fn handle_code_change_message(
    change_msg: &CodeChangeMessage,
    connection_id: &str,
    registry: &RoomRegistry,
) -> Result<(), ProtocolViolation> {
    let Some(current_room) = registry.room_of(connection_id).await else {
        return Err(ProtocolViolation::NotJoined { event: Event::CodeChange });
    };

    // The payload names the room; it has to be the one this connection joined.
    let room_id = change_msg.room_id.clone().unwrap_or_else(|| current_room.clone());
    if room_id != current_room {
        return Err(ProtocolViolation::NotInRoom { event: Event::CodeChange, room_id });
    }

    let delivered = registry
        .relay_code_change(connection_id, &room_id, change_msg.code.clone())
        .await;
    debug!("Code change from {} relayed to {} member(s)", connection_id, delivered);
    Ok(())
}
