use tracing::{debug, error};
use chrono::Utc;

use crate::error::ProtocolViolation;
use crate::models::{Envelope, Event, PongMessage};
use crate::ws::registry::PeerSender;

/// Handle PingMessage - reply to the sender only
pub fn handle_ping_message(connection_id: &str, sender: &PeerSender) -> Result<(), ProtocolViolation> {
    debug!("Ping message received from {}", connection_id);

    let pong = PongMessage { date: Utc::now().to_rfc3339() };
    match Envelope::encode(Event::Pong, &pong) {
        Ok(text) => {
            if sender.send(text).is_err() {
                error!("Failed to queue Pong message for {}", connection_id);
            }
        }
        Err(e) => error!("Failed to encode Pong message for {}: {}", connection_id, e),
    }
    Ok(())
}
