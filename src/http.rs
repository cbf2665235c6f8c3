//! HTTP endpoint reporting the colors still free to claim.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::message::ColorsResponse;
use crate::server::RegistryHandle;

/// Build the router
pub fn router(registry: RegistryHandle) -> Router {
    Router::new()
        .route("/colors", get(colors_handler))
        .with_state(registry)
}

/// Serve the router until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    registry: RegistryHandle,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP endpoint listening on {}", addr);
    }
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// GET /colors
async fn colors_handler(
    State(registry): State<RegistryHandle>,
) -> Result<Json<ColorsResponse>, StatusCode> {
    match registry.available_colors().await {
        Ok(colors) => Ok(Json(ColorsResponse::AvailableColors { colors })),
        Err(e) => {
            warn!("Cannot report available colors: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
