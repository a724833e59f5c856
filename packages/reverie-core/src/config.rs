//! Core configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_API_TIMEOUT_SECS, DEFAULT_FRAME_CACHE_SIZE, DEFAULT_RATE_LIMIT_REQUESTS,
    DEFAULT_RATE_LIMIT_WINDOW_SECS, DEFAULT_SHUTDOWN_DELAY_SECS,
};

/// Configuration for the Reverie service.
///
/// All fields have sensible defaults; deployments override individual values
/// through the server config file, environment variables, or CLI flags.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Server
    /// Port to bind the HTTP/WS server to.
    pub bind_port: u16,

    /// Public hostname viewers reach the service at. Used to build the URLs
    /// returned by the embed endpoint.
    pub public_host: String,

    // Producer authentication
    /// Bearer token the GPU worker must present on `/ws/gpu`.
    ///
    /// When unset, producer connections are accepted unauthenticated
    /// (dev mode, logged loudly at startup).
    pub producer_token: Option<String>,

    // Presence / lifecycle
    /// Grace period after the last viewer leaves before the GPU is stopped (seconds).
    pub shutdown_delay_secs: u64,

    /// Window in which read-API activity counts as "recent" (seconds).
    pub api_timeout_secs: u64,

    // Frame cache
    /// Capacity of the recent-frame ring buffer.
    pub frame_cache_size: usize,

    // Read-API rate limiting
    /// Max read-API requests per window, per client IP.
    pub rate_limit_requests: usize,

    /// Read-API rate-limit window (seconds).
    pub rate_limit_window_secs: u64,

    // Orchestrator
    /// Base URL of the admin panel that fronts the pod orchestrator.
    /// When unset, GPU lifecycle management is disabled.
    pub orchestrator_url: Option<String>,

    /// Bearer token for the admin panel API.
    pub orchestrator_token: Option<String>,

    // Persistence
    /// Directory holding the persisted generation-state blob and its sidecar.
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            public_host: "localhost".to_string(),
            producer_token: None,
            shutdown_delay_secs: DEFAULT_SHUTDOWN_DELAY_SECS,
            api_timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            frame_cache_size: DEFAULT_FRAME_CACHE_SIZE,
            rate_limit_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            orchestrator_url: None,
            orchestrator_token: None,
            state_dir: PathBuf::from("data/dreams"),
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_cache_size == 0 {
            return Err("frame_cache_size must be >= 1".to_string());
        }
        if self.rate_limit_requests == 0 {
            return Err("rate_limit_requests must be >= 1".to_string());
        }
        if self.rate_limit_window_secs == 0 {
            return Err("rate_limit_window_secs must be >= 1".to_string());
        }
        if self.orchestrator_url.as_deref() == Some("") {
            return Err("orchestrator_url must not be empty when set".to_string());
        }
        Ok(())
    }
}
