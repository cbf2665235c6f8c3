//! Handshake controller
//!
//! Reads the mandatory startup frame from a fresh WebSocket, reserves the
//! claimed identity in the registry, and either hands the socket on to a
//! session or closes it. A rejected socket is never retried.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::ConnectionRecord;
use crate::error::{HandshakeError, MalformedMessage};
use crate::message::decode_startup;
use crate::server::RegistryHandle;
use crate::types::{Color, ConnectionId};

/// Default time a new socket has to send its startup frame
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A socket whose identity has been reserved
pub struct Admission<T> {
    /// The registered identity
    pub record: ConnectionRecord,
    /// The live transport, now owned by the caller
    pub ws: WebSocketStream<T>,
}

impl<T> fmt::Debug for Admission<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Run the handshake on `ws`
///
/// On success the identity is in the registry and its close token is a
/// child of `shutdown`. Cancelling `shutdown` while waiting for the startup
/// frame rejects the socket. On failure the socket has been closed (when
/// still possible) and the registry is untouched.
pub async fn handshake<T>(
    mut ws: WebSocketStream<T>,
    id: ConnectionId,
    registry: &RegistryHandle,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<Admission<T>, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match admit(&mut ws, id, registry, timeout, shutdown).await {
        Ok(record) => Ok(Admission { record, ws }),
        Err(e) => {
            reject(&mut ws, &e).await;
            Err(e)
        }
    }
}

async fn admit<T>(
    ws: &mut WebSocketStream<T>,
    id: ConnectionId,
    registry: &RegistryHandle,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Result<ConnectionRecord, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (name, color) = tokio::select! {
        _ = shutdown.cancelled() => return Err(HandshakeError::ShuttingDown),
        startup = tokio::time::timeout(timeout, await_startup(ws)) => {
            startup.map_err(|_| HandshakeError::Timeout(timeout))??
        }
    };

    debug!("Connection {} claims '{}' ({})", id, name, color);

    let record = ConnectionRecord::new(id, name, color, shutdown.child_token());
    Ok(registry.try_admit(record).await?)
}

/// Wait for the first data frame; ping/pong frames are skipped
async fn await_startup<T>(ws: &mut WebSocketStream<T>) -> Result<(String, Color), HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => return Ok(decode_startup(&text)?),
            Message::Binary(_) => return Err(MalformedMessage::Binary.into()),
            Message::Close(_) => return Err(HandshakeError::Closed),
            _ => continue,
        }
    }
    Err(HandshakeError::Closed)
}

/// Close a rejected socket with a reason, if it is still open
async fn reject<T>(ws: &mut WebSocketStream<T>, err: &HandshakeError)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    info!("Handshake rejected: {}", err);

    if !err.transport_open() {
        return;
    }

    let frame = CloseFrame {
        code: err.close_code(),
        reason: Cow::Borrowed(err.close_reason()),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!("Failed to close rejected socket: {}", e);
    }
}
