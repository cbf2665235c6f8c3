//! Multi-user WebSocket Chat Relay Library
//!
//! A WebSocket chat relay built with tokio-tungstenite. Every client claims
//! a display name and one of seven colors, both unique among live
//! connections, then exchanges short messages that are fanned out to
//! everyone connected.
//!
//! # Features
//! - Startup handshake with name/color uniqueness
//! - Broadcast of chat messages, joins and leaves to every client
//! - Per-connection concurrent read and write tasks
//! - `GET /colors` listing the colors still free
//! - Graceful shutdown
//!
//! # Architecture
//! - `RegistryServer` is an actor owning the live-connection registry;
//!   admission is atomic because every command is handled in turn
//! - `BroadcastHub` fans events out through a `tokio::sync::broadcast`
//!   channel, one subscription per session
//! - Each connection runs the `handshake`, then a `Session` with a read
//!   task and a write task
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use tokio_util::task::TaskTracker;
//! use chat_relay::{serve, BroadcastHub, ChatState, RegistryServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     let (registry, _actor) = RegistryServer::spawn(256);
//!
//!     let state = ChatState {
//!         registry,
//!         hub: BroadcastHub::default(),
//!         handshake_timeout: std::time::Duration::from_secs(10),
//!         shutdown: CancellationToken::new(),
//!         tasks: TaskTracker::new(),
//!     };
//!     serve(listener, state).await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod hub;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use connection::ConnectionRecord;
pub use error::{AppError, ConfigError, HandshakeError, MalformedMessage, RegistryError};
pub use handler::{handle_connection, handle_websocket, serve, ChatState};
pub use handshake::{handshake, Admission};
pub use hub::{BroadcastHub, Subscription};
pub use message::{ClientMessage, ColorsResponse, ServerMessage};
pub use registry::Registry;
pub use server::{monitor_connections, RegistryCommand, RegistryHandle, RegistryServer};
pub use session::Session;
pub use types::{Color, ConnectionId};
