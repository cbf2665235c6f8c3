//! Multi-user WebSocket Chat Relay - Entry Point
//!
//! Starts the registry actor, the `/colors` HTTP endpoint and the WebSocket
//! accept loop, and shuts them down on Ctrl-C.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chat_relay::{
    http, monitor_connections, serve, AppError, BroadcastHub, ChatState, RegistryServer,
    ServerConfig,
};

/// How long open connections get to finish after Ctrl-C
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Start listeners; failing to bind is fatal
    let ws_listener = TcpListener::bind(&config.ws_addr).await?;
    info!("WebSocket Chat Relay listening on {}", config.ws_addr);
    let http_listener = TcpListener::bind(&config.http_addr).await?;

    // Start the registry actor
    let (registry, _registry_task) = RegistryServer::spawn(config.registry_buffer);
    info!("Registry actor started");

    let shutdown = CancellationToken::new();
    let state = ChatState {
        registry: registry.clone(),
        hub: BroadcastHub::new(config.hub_capacity),
        handshake_timeout: config.handshake_timeout,
        shutdown: shutdown.clone(),
        tasks: TaskTracker::new(),
    };

    let monitor_task = tokio::spawn(monitor_connections(
        registry.clone(),
        config.monitor_interval,
        shutdown.clone(),
    ));

    let http_task = tokio::spawn(http::serve(http_listener, registry.clone(), shutdown.clone()));

    // Connection accept loop
    let accept_task = tokio::spawn(serve(ws_listener, state));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");

    match registry.close_all().await {
        Ok(count) => info!("Closed {} connections", count),
        Err(e) => error!("Failed to close connections: {}", e),
    }
    shutdown.cancel();

    // The accept loop returns once its connection tasks have drained
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, accept_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Accept task failed: {}", e),
        Err(_) => warn!(
            "Connections still open after {:?}, exiting anyway",
            SHUTDOWN_TIMEOUT
        ),
    }
    let _ = monitor_task.await;
    match http_task.await {
        Ok(Err(e)) => error!("HTTP endpoint error: {}", e),
        Err(e) => error!("HTTP endpoint task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Chat relay stopped");
    Ok(())
}
