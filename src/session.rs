//! Connection session
//!
//! Owns one admitted connection: a read task (WebSocket -> hub) and a write
//! task (hub -> WebSocket) running concurrently, with a single teardown once
//! the read task has announced the `leave`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionRecord;
use crate::error::MalformedMessage;
use crate::handshake::Admission;
use crate::hub::{BroadcastHub, Subscription};
use crate::message::{decode_client, encode_server, ClientMessage, ServerMessage};
use crate::server::RegistryHandle;
use crate::types::{Color, MessageClock};

/// How long the write task waits for the close frame to go out
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A running admitted connection
pub struct Session<T> {
    record: ConnectionRecord,
    ws: WebSocketStream<T>,
    subscription: Subscription,
    hub: BroadcastHub,
    teardown: Teardown,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Subscribe the admitted connection to the hub and announce it
    ///
    /// The subscription is taken before the `join` is published, so the new
    /// client sees its own arrival.
    pub fn start(admission: Admission<T>, hub: BroadcastHub, registry: RegistryHandle) -> Self {
        let Admission { record, ws } = admission;
        let subscription = hub.subscribe();

        hub.publish(ServerMessage::Join {
            name: record.name.clone(),
            color: record.color,
        });

        Self {
            teardown: Teardown::new(record.clone(), registry),
            record,
            ws,
            subscription,
            hub,
        }
    }

    /// The identity this session serves
    pub fn record(&self) -> &ConnectionRecord {
        &self.record
    }

    /// Run both loops to completion
    ///
    /// Either loop ending stops the other. Teardown runs as soon as the read
    /// task is done, without waiting for the write task's close frame.
    pub async fn run(self) {
        let Session {
            record,
            ws,
            subscription,
            hub,
            teardown,
        } = self;

        let (ws_sender, ws_receiver) = ws.split();
        let cancel = record.close_token();

        // Read task (WebSocket -> hub)
        let read_task = tokio::spawn(read_loop(
            ws_receiver,
            record.name.clone(),
            record.color,
            hub,
            cancel.clone(),
        ));

        // Write task (hub -> WebSocket)
        let write_task = tokio::spawn(write_loop(
            ws_sender,
            subscription,
            record.name.clone(),
            cancel,
        ));

        if let Err(e) = read_task.await {
            error!("Read task for '{}' failed: {}", record.name, e);
        }
        teardown.run().await;

        if let Err(e) = write_task.await {
            error!("Write task for '{}' failed: {}", record.name, e);
        }
    }
}

/// Receive frames, stamp chat messages and publish them
///
/// Publishes the connection's `leave` exactly once, after its last message,
/// however the loop ends.
async fn read_loop<T>(
    mut ws_receiver: SplitStream<WebSocketStream<T>>,
    name: String,
    color: Color,
    hub: BroadcastHub,
    cancel: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut clock = MessageClock::new();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Read task for '{}' cancelled", name);
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match decode_client(&text) {
                Ok(ClientMessage::Message { message }) => {
                    hub.publish(ServerMessage::Message {
                        name: name.clone(),
                        color,
                        message,
                        timestamp: clock.stamp(),
                    });
                }
                Ok(other) => {
                    warn!(
                        "Dropped frame from '{}': {}",
                        name,
                        MalformedMessage::Unexpected(other.tag())
                    );
                }
                Err(e) => {
                    warn!("Dropped frame from '{}': {}", name, e);
                }
            },
            Some(Ok(Message::Binary(_))) => {
                warn!("Dropped frame from '{}': {}", name, MalformedMessage::Binary);
            }
            Some(Ok(Message::Close(_))) => {
                debug!("'{}' sent close frame", name);
                break;
            }
            Some(Ok(_)) => {
                // Ping/Pong are answered by tungstenite
            }
            Some(Err(e)) => {
                debug!("WebSocket error for '{}': {}", name, e);
                break;
            }
            None => break,
        }
    }

    hub.publish(ServerMessage::Leave { name, color });
    cancel.cancel();
}

/// Forward hub events to the client until either side goes away
async fn write_loop<T>(
    mut ws_sender: SplitSink<WebSocketStream<T>, Message>,
    mut subscription: Subscription,
    name: String,
    cancel: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => event,
        };
        let Some(event) = event else {
            debug!("Hub closed, ending write task for '{}'", name);
            break;
        };

        let json = match encode_server(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                continue;
            }
        };

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = ws_sender.send(Message::Text(json.into())) => sent,
        };
        if let Err(e) = sent {
            debug!("WebSocket send to '{}' failed: {}", name, e);
            break;
        }
    }

    cancel.cancel();
    if subscription.dropped() > 0 {
        warn!("'{}' missed {} events while lagging", name, subscription.dropped());
    }
    subscription.unsubscribe();

    // Send close frame when done
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_sender.close()).await;
    debug!("Write task ended for '{}'", name);
}

/// End-of-session cleanup, run at most once
///
/// Runs after the read task has published the `leave`, so the name and
/// color become free right after the departure is announced. The write
/// task may still be flushing its close frame at that point.
struct Teardown {
    record: ConnectionRecord,
    registry: RegistryHandle,
    done: AtomicBool,
}

impl Teardown {
    fn new(record: ConnectionRecord, registry: RegistryHandle) -> Self {
        Self {
            record,
            registry,
            done: AtomicBool::new(false),
        }
    }

    /// Stop the loops and release the registry entry
    ///
    /// Returns false if teardown already ran.
    async fn run(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.record.close();
        match self
            .registry
            .remove_connection(&self.record.name, self.record.id)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("'{}' was already removed", self.record.name),
            Err(e) => warn!("Could not deregister '{}': {}", self.record.name, e),
        }

        info!(
            "'{}' ({}) disconnected after {}s",
            self.record.name,
            self.record.color,
            self.record.age().as_secs()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::server::RegistryServer;
    use crate::testing::{faulty_ws_pair, ws_pair, WriteFault};
    use crate::types::ConnectionId;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        registry: RegistryHandle,
        hub: BroadcastHub,
        shutdown: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let (registry, _task) = RegistryServer::spawn(16);
            Self {
                registry,
                hub: BroadcastHub::new(64),
                shutdown: CancellationToken::new(),
            }
        }

        /// Admit `name`/`color` and run its session in the background
        async fn connect(
            &self,
            name: &str,
            color: Color,
        ) -> (WebSocketStream<DuplexStream>, JoinHandle<()>) {
            let (server, client) = ws_pair().await;
            (client, self.run_session(name, color, server).await)
        }

        /// Admit `name`/`color` on an existing server socket
        async fn run_session<T>(
            &self,
            name: &str,
            color: Color,
            ws: WebSocketStream<T>,
        ) -> JoinHandle<()>
        where
            T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        {
            let record = ConnectionRecord::new(
                ConnectionId::new(),
                name.to_string(),
                color,
                self.shutdown.child_token(),
            );
            let record = self.registry.try_admit(record).await.unwrap();
            let session = Session::start(
                Admission { record, ws },
                self.hub.clone(),
                self.registry.clone(),
            );
            tokio::spawn(session.run())
        }
    }

    fn chat(text: &str) -> Message {
        Message::Text(format!(r#"{{"_tag":"message","message":"{text}"}}"#).into())
    }

    async fn next_event(client: &mut WebSocketStream<DuplexStream>) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(WAIT, client.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .expect("transport error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn observe(subscription: &mut Subscription) -> ServerMessage {
        let event = tokio::time::timeout(WAIT, subscription.recv())
            .await
            .expect("timed out waiting for event")
            .expect("hub closed");
        (*event).clone()
    }

    #[tokio::test]
    async fn test_new_client_sees_own_join() {
        let harness = Harness::new();
        let (mut alice, _session) = harness.connect("alice", Color::Red).await;

        assert_eq!(
            next_event(&mut alice).await,
            ServerMessage::Join {
                name: "alice".to_string(),
                color: Color::Red
            }
        );
    }

    #[tokio::test]
    async fn test_chat_reaches_every_client() {
        let harness = Harness::new();
        let (mut alice, _a) = harness.connect("alice", Color::Red).await;
        let (mut bob, _b) = harness.connect("bob", Color::Blue).await;

        // alice: own join, bob's join. bob: own join.
        next_event(&mut alice).await;
        next_event(&mut alice).await;
        next_event(&mut bob).await;

        alice.send(chat("hi")).await.unwrap();
        alice.send(chat("again")).await.unwrap();

        let mut timestamps = Vec::new();
        for client in [&mut alice, &mut bob] {
            let first = next_event(client).await;
            let second = next_event(client).await;
            match (first, second) {
                (
                    ServerMessage::Message {
                        name,
                        color,
                        message,
                        timestamp: t1,
                    },
                    ServerMessage::Message {
                        message: message2,
                        timestamp: t2,
                        ..
                    },
                ) => {
                    assert_eq!(name, "alice");
                    assert_eq!(color, Color::Red);
                    assert_eq!(message, "hi");
                    assert_eq!(message2, "again");
                    assert!(t2 > t1);
                    timestamps.push((t1, t2));
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
        // Both clients saw the same stamped events
        assert_eq!(timestamps[0], timestamps[1]);
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_cleans_up() {
        let harness = Harness::new();
        let mut observer = harness.hub.subscribe();
        let (alice, session) = harness.connect("alice", Color::Red).await;
        assert!(matches!(observe(&mut observer).await, ServerMessage::Join { .. }));

        drop(alice);
        tokio::time::timeout(WAIT, session).await.unwrap().unwrap();

        assert_eq!(
            observe(&mut observer).await,
            ServerMessage::Leave {
                name: "alice".to_string(),
                color: Color::Red
            }
        );
        assert!(tokio::time::timeout(Duration::from_millis(100), observer.recv())
            .await
            .is_err());

        let snapshot = harness.registry.snapshot().await.unwrap();
        assert!(snapshot.iter().all(|r| r.name != "alice"));
        let colors = harness.registry.available_colors().await.unwrap();
        assert!(colors.contains(&Color::Red));
    }

    #[tokio::test]
    async fn test_leave_follows_all_messages() {
        let harness = Harness::new();
        let mut observer = harness.hub.subscribe();
        let (mut alice, session) = harness.connect("alice", Color::Red).await;

        for text in ["one", "two", "three"] {
            alice.send(chat(text)).await.unwrap();
        }
        alice.close(None).await.unwrap();
        tokio::time::timeout(WAIT, session).await.unwrap().unwrap();

        let mut tags = Vec::new();
        for _ in 0..5 {
            tags.push(match observe(&mut observer).await {
                ServerMessage::Join { .. } => "join".to_string(),
                ServerMessage::Message { message, .. } => message,
                ServerMessage::Leave { .. } => "leave".to_string(),
            });
        }
        assert_eq!(tags, vec!["join", "one", "two", "three", "leave"]);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let harness = Harness::new();
        let mut observer = harness.hub.subscribe();
        let (mut alice, _session) = harness.connect("alice", Color::Red).await;
        observe(&mut observer).await;

        alice.send(Message::Text("garbage".into())).await.unwrap();
        alice
            .send(Message::Text(r#"{"_tag":"startup","color":"blue","name":"eve"}"#.into()))
            .await
            .unwrap();
        alice.send(Message::Binary(vec![1, 2].into())).await.unwrap();
        alice.send(chat("still here")).await.unwrap();

        match observe(&mut observer).await {
            ServerMessage::Message { message, name, .. } => {
                assert_eq!(message, "still here");
                assert_eq!(name, "alice");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(harness.registry.snapshot().await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_external_close_ends_session() {
        let harness = Harness::new();
        let mut observer = harness.hub.subscribe();
        let (mut alice, session) = harness.connect("alice", Color::Red).await;
        observe(&mut observer).await;

        assert!(harness.registry.close("alice").await.unwrap());
        tokio::time::timeout(WAIT, session).await.unwrap().unwrap();

        assert!(matches!(
            observe(&mut observer).await,
            ServerMessage::Leave { .. }
        ));
        assert!(harness.registry.snapshot().await.unwrap().is_empty());

        // The client is told the connection is over
        let mut closed = false;
        while let Ok(Some(frame)) = tokio::time::timeout(WAIT, alice.next()).await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                closed = true;
                break;
            }
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_server_shutdown_ends_all_sessions() {
        let harness = Harness::new();
        let (_alice, a) = harness.connect("alice", Color::Red).await;
        let (_bob, b) = harness.connect("bob", Color::Blue).await;

        harness.shutdown.cancel();

        tokio::time::timeout(WAIT, a).await.unwrap().unwrap();
        tokio::time::timeout(WAIT, b).await.unwrap().unwrap();
        assert!(harness.registry.snapshot().await.unwrap().is_empty());
        assert_eq!(harness.hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_ends_session() {
        let harness = Harness::new();
        let mut observer = harness.hub.subscribe();
        let (server, _client) = faulty_ws_pair(WriteFault::Fail).await;
        let session = harness.run_session("alice", Color::Red, server).await;

        // Delivering the join fails, which ends the whole session
        tokio::time::timeout(WAIT, session).await.unwrap().unwrap();

        assert!(matches!(observe(&mut observer).await, ServerMessage::Join { .. }));
        assert_eq!(
            observe(&mut observer).await,
            ServerMessage::Leave {
                name: "alice".to_string(),
                color: Color::Red
            }
        );
        assert!(tokio::time::timeout(Duration::from_millis(100), observer.recv())
            .await
            .is_err());
        assert!(harness.registry.snapshot().await.unwrap().is_empty());

        drop(observer);
        assert_eq!(harness.hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_identity_released_before_close_completes() {
        let harness = Harness::new();
        let mut observer = harness.hub.subscribe();
        let (server, client) = faulty_ws_pair(WriteFault::Stall).await;
        let session = harness.run_session("alice", Color::Red, server).await;
        observe(&mut observer).await;

        drop(client);
        assert!(matches!(
            observe(&mut observer).await,
            ServerMessage::Leave { .. }
        ));

        // The name is free while the write task still waits on its close frame
        tokio::time::timeout(Duration::from_millis(500), async {
            while !harness.registry.snapshot().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!session.is_finished());

        tokio::time::timeout(WAIT, session).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let (registry, _task) = RegistryServer::spawn(16);
        let record = ConnectionRecord::new(
            ConnectionId::new(),
            "alice".to_string(),
            Color::Red,
            CancellationToken::new(),
        );
        let record = registry.try_admit(record).await.unwrap();
        let teardown = Teardown::new(record.clone(), registry.clone());

        let (first, second) = tokio::join!(teardown.run(), teardown.run());
        assert!(first ^ second);
        assert!(record.is_closing());
        assert!(registry.snapshot().await.unwrap().is_empty());
    }
}
