//! Message protocol definitions
//!
//! JSON text frames discriminated by a `_tag` field, using Serde's
//! internally tagged enums for type-safe serialization/deserialization.
//! The codec functions at the bottom are the only place frames are
//! turned into values and back.

use serde::{Deserialize, Serialize};

use crate::error::MalformedMessage;
use crate::types::Color;

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Identity claim, mandatory first frame
    Startup { color: Color, name: String },
    /// Chat text
    Message { message: String },
}

impl ClientMessage {
    /// Wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::Startup { .. } => "startup",
            ClientMessage::Message { .. } => "message",
        }
    }
}

/// Server → Client message
///
/// Everything published on the broadcast hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Chat text stamped with the sender's identity
    Message {
        name: String,
        color: Color,
        message: String,
        /// Epoch milliseconds
        timestamp: u64,
    },
    /// A connection was admitted
    Join { name: String, color: Color },
    /// A connection went away
    Leave { name: String, color: Color },
}

impl ServerMessage {
    /// Name of the connection this event is about
    pub fn name(&self) -> &str {
        match self {
            ServerMessage::Message { name, .. }
            | ServerMessage::Join { name, .. }
            | ServerMessage::Leave { name, .. } => name,
        }
    }
}

/// Response of the `GET /colors` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum ColorsResponse {
    AvailableColors { colors: Vec<Color> },
}

/// Decode any client frame
pub fn decode_client(raw: &str) -> Result<ClientMessage, MalformedMessage> {
    Ok(serde_json::from_str(raw)?)
}

/// Decode a frame that must be a startup message
///
/// Returns the claimed name and color.
pub fn decode_startup(raw: &str) -> Result<(String, Color), MalformedMessage> {
    match decode_client(raw)? {
        ClientMessage::Startup { name, .. } if name.trim().is_empty() => {
            Err(MalformedMessage::EmptyName)
        }
        ClientMessage::Startup { color, name } => Ok((name, color)),
        other => Err(MalformedMessage::Unexpected(other.tag())),
    }
}

/// Canonical serialization of a client message
pub fn encode_client(msg: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Serialize a server message for the wire
///
/// Cannot fail for these shapes; the `Result` is serde's signature.
pub fn encode_server(msg: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}
