//! Error taxonomy shared by the client core, the relay and the compile dispatcher.

use thiserror::Error;

use crate::models::Event;

/// The transport to the relay could not be established, or was lost.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("relay at {url} did not complete the handshake within {timeout_ms} ms")]
    HandshakeTimeout { url: String, timeout_ms: u64 },

    #[error("relay at {url} sent an invalid handshake: {reason}")]
    Handshake { url: String, reason: String },

    #[error("connection closed")]
    Closed,
}

/// A frame that is malformed or arrives out of sequence. Always skipped, never fatal.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("invalid {event} payload: {source}")]
    Payload {
        event: Event,
        #[source]
        source: serde_json::Error,
    },

    #[error("{event} is missing required field `{field}`")]
    MissingField { event: Event, field: &'static str },

    #[error("{event} from a connection that is not in room {room_id}")]
    NotInRoom { event: Event, room_id: String },

    #[error("{event} received before JOIN")]
    NotJoined { event: Event },

    #[error("unexpected {0} from a client")]
    Unexpected(Event),
}

/// Failure reported by, or while talking to, the compilation service.
///
/// The `Display` output is exactly the text shown as program output.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("An error occurred")]
    Failed(#[source] Option<reqwest::Error>),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("cannot join: {0} must not be empty")]
    InvalidJoin(&'static str),
}
