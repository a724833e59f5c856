//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. There are no module-level
//! singletons; everything hangs off the [`Services`] container built here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::api::{AppState, RateLimiter};
use crate::config::Config;
use crate::context::NetworkContext;
use crate::error::{ReverieError, ReverieResult};
use crate::hub::{StreamingHub, StreamStatus};
use crate::services::orchestrator::{AdminApiOrchestrator, DisabledOrchestrator, Orchestrator};
use crate::services::pod::PodController;
use crate::services::presence::{PodLifecycle, PresenceTracker};
use crate::services::state_store::StateStore;
use crate::stream::frame_cache::FrameCache;
use crate::stream::playback::PlaybackQueue;

/// Timeout for orchestrator admin-API requests (seconds).
const ORCHESTRATOR_HTTP_TIMEOUT_SECS: u64 = 30;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub frame_cache: Arc<FrameCache>,
    pub playback: Arc<PlaybackQueue>,
    pub presence: Arc<PresenceTracker>,
    pub pod: Arc<PodController>,
    pub state_store: Arc<StateStore>,
    pub hub: Arc<StreamingHub>,
    pub network: NetworkContext,
    pub rate_limiter: Arc<RateLimiter>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
}

impl Services {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Builds the state handed to the HTTP server.
    pub fn app_state(&self) -> AppState {
        AppState {
            hub: Arc::clone(&self.hub),
            frame_cache: Arc::clone(&self.frame_cache),
            presence: Arc::clone(&self.presence),
            pod: Arc::clone(&self.pod),
            rate_limiter: Arc::clone(&self.rate_limiter),
            network: self.network.clone(),
            config: Arc::clone(&self.config),
        }
    }

    /// Starts background tasks that outlive individual connections.
    ///
    /// Currently one task: forwarding pod-state transitions to viewers as
    /// status broadcasts. It runs for the process lifetime.
    pub fn start_background_tasks(&self) {
        let hub = Arc::clone(&self.hub);
        let mut transitions = self.pod.subscribe();
        tokio::spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(transition) => {
                        let status = StreamStatus::from_pod_state(transition.state);
                        let message = transition
                            .error
                            .unwrap_or_else(|| status.default_message().to_string());
                        hub.broadcast_status(status, &message).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[Bootstrap] status forwarder lagged by {} transitions", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Initiates graceful shutdown: tears down all connections and stops the
    /// playback worker.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown...");
        self.hub.shutdown().await;
        log::info!("[Bootstrap] shutdown complete");
    }
}

/// Creates the shared HTTP client for orchestrator communication.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(ORCHESTRATOR_HTTP_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order matters - services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client)
/// 2. Orchestrator client and pod controller
/// 3. Presence tracker (gated on the pod controller)
/// 4. Frame path (cache, playback queue, state store)
/// 5. The hub, which coordinates all of the above
pub fn bootstrap_services(config: Config, network: NetworkContext) -> ReverieResult<Services> {
    config
        .validate()
        .map_err(ReverieError::Configuration)?;

    let http_client = create_http_client();

    let orchestrator: Arc<dyn Orchestrator> = match &config.orchestrator_url {
        Some(url) => Arc::new(AdminApiOrchestrator::new(
            http_client.clone(),
            url,
            config.orchestrator_token.clone(),
        )),
        None => {
            log::warn!("[Bootstrap] no orchestrator configured - GPU lifecycle management disabled");
            Arc::new(DisabledOrchestrator)
        }
    };
    let configured = config.orchestrator_url.is_some();
    let pod = Arc::new(PodController::new(orchestrator, configured));

    let presence = Arc::new(PresenceTracker::new(
        Duration::from_secs(config.shutdown_delay_secs),
        Duration::from_secs(config.api_timeout_secs),
        Arc::clone(&pod) as Arc<dyn PodLifecycle>,
    ));

    let frame_cache = Arc::new(FrameCache::new(config.frame_cache_size));
    let playback = Arc::new(PlaybackQueue::new());
    let state_store = Arc::new(StateStore::new(&config.state_dir));

    let hub = Arc::new(StreamingHub::new(
        Arc::clone(&frame_cache),
        Arc::clone(&playback),
        Arc::clone(&presence),
        Arc::clone(&pod),
        Arc::clone(&state_store),
    ));

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_requests,
        Duration::from_secs(config.rate_limit_window_secs),
    ));

    if config.producer_token.is_none() {
        log::warn!("[Bootstrap] producer token not configured - /ws/gpu will accept any client");
    }

    Ok(Services {
        config: Arc::new(config),
        frame_cache,
        playback,
        presence,
        pod,
        state_store,
        hub,
        network,
        rate_limiter,
        http_client,
    })
}
