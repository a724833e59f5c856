//! HTTP/WebSocket API layer.
//!
//! Thin handlers that translate between the edge protocols and the hub;
//! business logic lives in the hub and services.

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::context::NetworkContext;
use crate::hub::StreamingHub;
use crate::services::pod::PodController;
use crate::services::presence::PresenceTracker;
use crate::stream::frame_cache::FrameCache;

pub mod http;
pub mod rate_limit;
pub mod ws;

pub use rate_limit::RateLimiter;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to services; handlers delegate to them.
#[derive(Clone)]
pub struct AppState {
    /// Central hub for viewer/producer connections.
    pub hub: Arc<StreamingHub>,
    /// Cache of recently displayed frames.
    pub frame_cache: Arc<FrameCache>,
    /// Viewer presence tracking for GPU lifecycle.
    pub presence: Arc<PresenceTracker>,
    /// GPU pod controller.
    pub pod: Arc<PodController>,
    /// Per-IP sliding-window rate limiter for the read API.
    pub rate_limiter: Arc<RateLimiter>,
    /// Network configuration (port, public host).
    pub network: NetworkContext,
    /// Application configuration.
    pub config: Arc<Config>,
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.bind_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Confirm the bound port (relevant for port-0 binds) and signal waiters
    let port = listener.local_addr()?.port();
    state.network.set_port(port);

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    // ConnectInfo<SocketAddr> extraction needs the connect-info service
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
