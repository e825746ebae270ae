use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolViolation;
use crate::models::Member;

/// Event names carried in the `event` field of every frame.
///
/// `ConnectError` and `ConnectFailed` never travel over the wire; the client
/// connection raises them locally through the same handler table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    #[serde(rename = "CONNECTED")]
    Connected,
    #[serde(rename = "JOIN")]
    Join,
    #[serde(rename = "JOINED")]
    Joined,
    #[serde(rename = "SYNC_CODE")]
    SyncCode,
    #[serde(rename = "CODE_CHANGE")]
    CodeChange,
    #[serde(rename = "MEMBER_LEFT")]
    MemberLeft,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "connect_error")]
    ConnectError,
    #[serde(rename = "connect_failed")]
    ConnectFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Connected => "CONNECTED",
            Event::Join => "JOIN",
            Event::Joined => "JOINED",
            Event::SyncCode => "SYNC_CODE",
            Event::CodeChange => "CODE_CHANGE",
            Event::MemberLeft => "MEMBER_LEFT",
            Event::Ping => "PING",
            Event::Pong => "PONG",
            Event::ConnectError => "connect_error",
            Event::ConnectFailed => "connect_failed",
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single text frame: `{"event": "...", "payload": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(event: Event, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Parse a frame received from the wire.
    pub fn parse(text: &str) -> Result<Self, ProtocolViolation> {
        serde_json::from_str(text).map_err(ProtocolViolation::Malformed)
    }

    /// Serialize `payload` under `event` straight into frame text.
    pub fn encode<T: Serialize>(event: Event, payload: &T) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Self::new(event, payload)?)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the payload into the struct expected for this event.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolViolation> {
        decode_payload(self.event, &self.payload)
    }
}

pub fn decode_payload<T: DeserializeOwned>(event: Event, payload: &Value) -> Result<T, ProtocolViolation> {
    T::deserialize(payload).map_err(|source| ProtocolViolation::Payload { event, source })
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMessage {
    pub connection_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub room_id: String,
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMessage {
    pub members: Vec<Member>,
    pub joiner_id: String,
}

/// `code` is `None` when the sender has no document yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncCodeMessage {
    #[serde(default)]
    pub code: Option<String>,
    pub requester_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeChangeMessage {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberLeftMessage {
    pub connection_id: String,
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PingMessage {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PongMessage {
    pub date: String,
}

/// Payload of the locally raised `connect_error` / `connect_failed` events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransportErrorMessage {
    pub message: String,
}
