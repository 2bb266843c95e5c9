//! Signal protocol messages
//!
//! One JSON object per WebSocket text frame, tagged by `type`:
//!
//! ```text
//! client -> server: join-queue | leave | next | signal {to, signal} | ping {timestamp}
//! server -> client: matched {partnerId, initiator, roomId} | signal {from, signal}
//!                   | peer-left | pong {timestamp} | error {code, message}
//! ```
//!
//! Handshake payloads are carried as opaque JSON values; nothing here looks
//! inside them beyond checking that one is present.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, ProtocolError};
use crate::types::{RoomId, SessionId};
use crate::MAX_MESSAGE_SIZE;

/// Messages sent by a client to the relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter the match queue
    JoinQueue,

    /// Leave the queue or the current room
    Leave,

    /// Leave the current room and re-enter the queue
    Next,

    /// Handshake payload for the current partner
    Signal { to: SessionId, signal: Value },

    /// Keepalive
    Ping { timestamp: u64 },
}

/// Messages sent by the relay to a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Paired with a partner
    #[serde(rename_all = "camelCase")]
    Matched {
        partner_id: SessionId,
        initiator: bool,
        room_id: RoomId,
    },

    /// Handshake payload relayed from the partner
    Signal { from: SessionId, signal: Value },

    /// The partner left the room
    PeerLeft,

    /// Keepalive response
    Pong { timestamp: u64 },

    /// The last frame could not be processed
    Error { code: ErrorCode, message: String },
}

/// A handshake payload in flight between the two members of a room
///
/// `from` is always set by the relay from the verified sender, never taken
/// from the client.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalEnvelope {
    pub from: SessionId,
    pub to: SessionId,
    pub signal: Value,
}

impl SignalEnvelope {
    pub fn new(from: SessionId, to: SessionId, signal: Value) -> Self {
        Self { from, to, signal }
    }

    /// The frame the recipient receives
    pub fn into_delivery(self) -> ServerMessage {
        ServerMessage::Signal {
            from: self.from,
            signal: self.signal,
        }
    }
}

impl ClientMessage {
    /// Parse from JSON with the default frame size limit
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Self::from_json_limited(json, MAX_MESSAGE_SIZE)
    }

    /// Parse from JSON, enforcing `max` bytes and signal presence
    pub fn from_json_limited(json: &str, max: usize) -> Result<Self, ProtocolError> {
        if json.len() > max {
            return Err(ProtocolError::MessageTooLarge {
                size: json.len(),
                max,
            });
        }

        let msg: ClientMessage = serde_json::from_str(json)?;
        if let ClientMessage::Signal { signal, .. } = &msg {
            if signal.is_null() {
                return Err(ProtocolError::MissingSignal);
            }
        }
        Ok(msg)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

impl ServerMessage {
    /// Create an error message
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}
