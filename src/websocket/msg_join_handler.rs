use tracing::info;

use crate::error::ProtocolViolation;
use crate::models::{Event, JoinMessage, Member};
use crate::ws::registry::{PeerSender, RoomRegistry};

/// Handle JoinMessage
pub async fn handle_join_message(
    join_msg: &JoinMessage,
    connection_id: &str,
    sender: &PeerSender,
    registry: &RoomRegistry,
) -> Result<(), ProtocolViolation> {
    let room_id = join_msg.room_id.trim();
    if room_id.is_empty() {
        return Err(ProtocolViolation::MissingField { event: Event::Join, field: "roomId" });
    }
    let display_name = join_msg.display_name.trim();
    if display_name.is_empty() {
        return Err(ProtocolViolation::MissingField { event: Event::Join, field: "displayName" });
    }

    info!("Join message received from {}: room={}, name={}", connection_id, room_id, display_name);
    registry
        .join(room_id, Member::new(connection_id, display_name), sender.clone())
        .await;
    Ok(())
}
