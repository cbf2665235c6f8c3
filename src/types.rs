//! Basic type definitions for the chat relay
//!
//! Provides:
//! - `ConnectionId`: UUID-based identifier for an accepted socket
//! - `Color`: the fixed set of seven display colors
//! - `available_colors`: the colors not held by any live connection
//! - `MessageClock`: strictly increasing per-session timestamps

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseColorError;

/// Unique connection identifier (newtype pattern)
///
/// Assigned when a socket is accepted, before the handshake, so that
/// log lines can be correlated even for rejected connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display color claimed by a connection
///
/// Serialized as the lowercase color name. At any instant no two live
/// connections hold the same color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    /// Every color, in wire order
    pub const ALL: [Color; 7] = [
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
    ];

    /// Wire name of this color
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
            Color::Blue => "blue",
            Color::Magenta => "magenta",
            Color::Cyan => "cyan",
            Color::White => "white",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::ALL
            .into_iter()
            .find(|color| color.as_str() == s)
            .ok_or_else(|| ParseColorError(s.to_string()))
    }
}

/// Colors not present in `taken`, in `Color::ALL` order
pub fn available_colors<I>(taken: I) -> Vec<Color>
where
    I: IntoIterator<Item = Color>,
{
    let taken: Vec<Color> = taken.into_iter().collect();
    Color::ALL
        .into_iter()
        .filter(|color| !taken.contains(color))
        .collect()
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-session timestamp source
///
/// Stamps wall-clock milliseconds but never hands out the same value
/// twice, so a session's own messages are strictly ordered by timestamp.
#[derive(Debug, Default)]
pub struct MessageClock {
    last: u64,
}

impl MessageClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, strictly greater than the previous one
    pub fn stamp(&mut self) -> u64 {
        self.stamp_at(now_millis())
    }

    fn stamp_at(&mut self, now: u64) -> u64 {
        let ts = now.max(self.last + 1);
        self.last = ts;
        ts
    }
}
