//! Connection record definition
//!
//! Represents one admitted, live connection as the registry sees it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::types::{now_millis, Color, ConnectionId};

/// Admitted connection information
///
/// The transport and the hub subscription are owned by the session; the
/// record only carries the identity and a handle to ask the session to close.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Identifier assigned when the socket was accepted
    pub id: ConnectionId,
    /// Display name, unique among live connections
    pub name: String,
    /// Display color, unique among live connections
    pub color: Color,
    /// Admission time in epoch milliseconds
    pub connected_at: u64,
    /// Cancelled to tear the session down
    closer: CancellationToken,
}

impl ConnectionRecord {
    /// Create a record stamped with the current time
    pub fn new(id: ConnectionId, name: String, color: Color, closer: CancellationToken) -> Self {
        Self {
            id,
            name,
            color,
            connected_at: now_millis(),
            closer,
        }
    }

    /// Ask the owning session to shut down
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Whether a close has been requested
    pub fn is_closing(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// The session's close token
    pub fn close_token(&self) -> CancellationToken {
        self.closer.clone()
    }

    /// Time since admission
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.connected_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = ConnectionRecord::new(
            ConnectionId::new(),
            "alice".to_string(),
            Color::Red,
            CancellationToken::new(),
        );

        assert_eq!(record.name, "alice");
        assert_eq!(record.color, Color::Red);
        assert!(record.connected_at > 0);
        assert!(!record.is_closing());
        assert!(record.age() < Duration::from_secs(5));
    }

    #[test]
    fn test_close_reaches_every_clone() {
        let token = CancellationToken::new();
        let record = ConnectionRecord::new(
            ConnectionId::new(),
            "bob".to_string(),
            Color::Blue,
            token.clone(),
        );
        let copy = record.clone();

        copy.close();

        assert!(record.is_closing());
        assert!(token.is_cancelled());
    }
}
