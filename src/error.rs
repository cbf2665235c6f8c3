//! Error types for the chat relay
//!
//! Defines the decode, registry, handshake and application-level errors.
//! Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::types::Color;

/// Application-level errors
///
/// Fatal for the connection they occur on; at startup, fatal for the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A frame that does not decode to any recognized message shape
#[derive(Debug, Error)]
pub enum MalformedMessage {
    /// Not JSON, unknown `_tag`, missing field or unknown color
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    /// Startup message with an empty name
    #[error("name must not be empty")]
    EmptyName,

    /// Well-formed message in the wrong place
    #[error("unexpected '{0}' message")]
    Unexpected(&'static str),

    /// Binary frames carry no recognized shape
    #[error("binary frames are not supported")]
    Binary,
}

/// Identity conflicts and registry availability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A live connection already uses this name
    #[error("name '{0}' is already taken")]
    NameTaken(String),

    /// A live connection already uses this color
    #[error("color '{0}' is already taken")]
    ColorTaken(Color),

    /// The registry actor has stopped
    #[error("registry is unavailable")]
    Unavailable,
}

/// Reasons a new connection is rejected during the handshake
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The first frame was not a valid startup message
    #[error("malformed startup message: {0}")]
    Malformed(#[from] MalformedMessage),

    /// The requested identity conflicts with a live connection
    #[error("admission refused: {0}")]
    Refused(#[from] RegistryError),

    /// No startup message arrived in time
    #[error("no startup message within {0:?}")]
    Timeout(Duration),

    /// The server began shutting down before admission
    #[error("server shutting down")]
    ShuttingDown,

    /// The peer closed before sending a startup message
    #[error("connection closed during handshake")]
    Closed,

    /// The transport failed during the handshake
    #[error("transport error during handshake: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

impl HandshakeError {
    /// Close code sent to the peer when rejecting
    pub fn close_code(&self) -> CloseCode {
        match self {
            HandshakeError::Malformed(_) => CloseCode::Invalid,
            HandshakeError::Refused(RegistryError::Unavailable) => CloseCode::Error,
            HandshakeError::Refused(_) | HandshakeError::Timeout(_) => CloseCode::Policy,
            HandshakeError::ShuttingDown => CloseCode::Away,
            HandshakeError::Closed | HandshakeError::Transport(_) => CloseCode::Normal,
        }
    }

    /// Short close reason sent to the peer when rejecting
    pub fn close_reason(&self) -> &'static str {
        match self {
            HandshakeError::Malformed(_) => "malformed startup message",
            HandshakeError::Refused(RegistryError::NameTaken(_)) => "name already taken",
            HandshakeError::Refused(RegistryError::ColorTaken(_)) => "color already taken",
            HandshakeError::Refused(RegistryError::Unavailable) => "server unavailable",
            HandshakeError::Timeout(_) => "handshake timed out",
            HandshakeError::ShuttingDown => "server shutting down",
            HandshakeError::Closed | HandshakeError::Transport(_) => "",
        }
    }

    /// Whether the transport is still usable for sending a close frame
    pub fn transport_open(&self) -> bool {
        !matches!(self, HandshakeError::Closed | HandshakeError::Transport(_))
    }
}

/// Unknown color name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown color '{0}'")]
pub struct ParseColorError(pub String);

/// Invalid configuration value
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value could not be parsed
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    /// A value parsed but is out of range
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}
