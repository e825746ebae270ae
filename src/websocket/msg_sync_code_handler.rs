use tracing::{debug, warn};

use crate::error::ProtocolViolation;
use crate::models::{Event, SyncCodeMessage};
use crate::ws::registry::RoomRegistry;

/// Handle SyncCodeMessage - catch up members that joined after the sender
pub async fn handle_sync_code_message(
    sync_msg: &SyncCodeMessage,
    connection_id: &str,
    registry: &RoomRegistry,
) -> Result<(), ProtocolViolation> {
    if registry.room_of(connection_id).await.is_none() {
        return Err(ProtocolViolation::NotJoined { event: Event::SyncCode });
    }
    if sync_msg.requester_id != connection_id {
        warn!(
            "SYNC_CODE from {} names requester {}; routing by sender",
            connection_id, sync_msg.requester_id
        );
    }

    let delivered = registry
        .route_sync(connection_id, sync_msg.code.clone(), &sync_msg.requester_id)
        .await;
    debug!("SYNC_CODE from {} delivered to {} member(s)", connection_id, delivered);
    Ok(())
}
