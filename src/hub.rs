//! Broadcast hub for fanning events out to every session.
//!
//! One `tokio::sync::broadcast` channel shared by the whole process. Each
//! session holds its own `Subscription`, which buffers up to `capacity`
//! events. Publishing never waits on a subscriber: a subscription that falls
//! more than `capacity` events behind loses the oldest ones and carries on.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::message::ServerMessage;

/// Default number of events buffered per subscription.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// The process-wide broadcast hub. Cloneable; every clone publishes to the
/// same subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Arc<ServerMessage>>,
}

impl BroadcastHub {
    /// Create a hub buffering up to `capacity` events per subscription.
    ///
    /// `capacity` must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            dropped: 0,
        }
    }

    /// Deliver `event` to all current subscriptions.
    ///
    /// Returns the number of subscriptions it was queued for.
    pub fn publish(&self, event: ServerMessage) -> usize {
        // send() fails when there are no subscribers; nothing to do then.
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

/// A receive-only view of the hub.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<ServerMessage>>,
    dropped: u64,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the hub is gone. Events overwritten while this
    /// subscription lagged are skipped and counted in `dropped()`.
    pub async fn recv(&mut self) -> Option<Arc<ServerMessage>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    warn!("Subscription lagged, dropped {} oldest events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events skipped because this subscription lagged.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}
