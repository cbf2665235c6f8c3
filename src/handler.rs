//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket upgrade, the identity
//! handshake, and the session that follows. Also runs the accept loop.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::handshake::handshake;
use crate::hub::BroadcastHub;
use crate::server::RegistryHandle;
use crate::session::Session;
use crate::types::ConnectionId;

/// Everything a connection handler needs, shared by all connections
#[derive(Debug, Clone)]
pub struct ChatState {
    /// Registry actor
    pub registry: RegistryHandle,
    /// Process-wide broadcast hub
    pub hub: BroadcastHub,
    /// Time allowed for the startup frame
    pub handshake_timeout: Duration,
    /// Cancelled on server shutdown
    pub shutdown: CancellationToken,
    /// Connection tasks still running, drained by `serve` on shutdown
    pub tasks: TaskTracker,
}

/// Handle a new TCP connection
///
/// Performs the WebSocket upgrade, then the identity handshake, then runs
/// the session until the connection ends.
pub async fn handle_connection(stream: TcpStream, state: ChatState) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio::select! {
        _ = state.shutdown.cancelled() => return Ok(()),
        upgraded = tokio_tungstenite::accept_async(stream) => upgraded?,
    };

    let id = ConnectionId::new();
    info!("Connection {} opened from {}", id, peer_addr);

    handle_websocket(ws_stream, id, state).await;
    Ok(())
}

/// Run the identity handshake and, if admitted, the session
///
/// A rejected handshake only ends this connection.
pub async fn handle_websocket<T>(ws: WebSocketStream<T>, id: ConnectionId, state: ChatState)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let admission = match handshake(
        ws,
        id,
        &state.registry,
        state.handshake_timeout,
        &state.shutdown,
    )
    .await
    {
        Ok(admission) => admission,
        Err(e) => {
            debug!("Connection {} closed during handshake: {}", id, e);
            return;
        }
    };

    Session::start(admission, state.hub, state.registry)
        .run()
        .await;

    debug!("Connection {} finished", id);
}

/// Accept connections until `state.shutdown` is cancelled
///
/// Returns once every connection task it spawned has finished.
pub async fn serve(listener: TcpListener, state: ChatState) {
    loop {
        let accepted = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!("Accepted TCP connection from {}", addr);
                let conn_state = state.clone();

                // Spawn handler task for each connection
                state.tasks.spawn(async move {
                    if let Err(e) = handle_connection(stream, conn_state).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }

    state.tasks.close();
    info!("Accept loop stopped, waiting for {} connections", state.tasks.len());
    state.tasks.wait().await;
    info!("All connections finished");
}
