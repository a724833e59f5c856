//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `REVERIE_BIND_PORT`
    pub bind_port: u16,

    /// Public hostname viewers reach the service at (used for embed URLs).
    /// Override: `REVERIE_PUBLIC_HOST`
    pub public_host: String,

    /// Bearer token the GPU worker must present on `/ws/gpu`.
    /// Override: `REVERIE_PRODUCER_TOKEN`
    pub producer_token: Option<String>,

    /// Grace period after the last viewer leaves before the GPU stops (seconds).
    /// Override: `REVERIE_SHUTDOWN_DELAY`
    pub shutdown_delay_secs: u64,

    /// Window in which read-API activity counts as recent (seconds).
    /// Override: `REVERIE_API_TIMEOUT`
    pub api_timeout_secs: u64,

    /// Capacity of the recent-frame ring buffer.
    /// Override: `REVERIE_FRAME_CACHE_SIZE`
    pub frame_cache_size: usize,

    /// Max read-API requests per window, per client IP.
    /// Override: `REVERIE_RATE_LIMIT_REQUESTS`
    pub rate_limit_requests: usize,

    /// Read-API rate-limit window (seconds).
    /// Override: `REVERIE_RATE_LIMIT_WINDOW`
    pub rate_limit_window_secs: u64,

    /// Base URL of the admin panel fronting the pod orchestrator.
    /// Override: `REVERIE_ORCHESTRATOR_URL`
    pub orchestrator_url: Option<String>,

    /// Bearer token for the admin panel API.
    /// Override: `REVERIE_ORCHESTRATOR_TOKEN`
    pub orchestrator_token: Option<String>,

    /// Directory for the persisted generation-state blob.
    /// Override: `REVERIE_STATE_DIR` (handled by clap in main.rs)
    pub state_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = reverie_core::Config::default();
        Self {
            bind_port: core.bind_port,
            public_host: core.public_host,
            producer_token: None,
            shutdown_delay_secs: core.shutdown_delay_secs,
            api_timeout_secs: core.api_timeout_secs,
            frame_cache_size: core.frame_cache_size,
            rate_limit_requests: core.rate_limit_requests,
            rate_limit_window_secs: core.rate_limit_window_secs,
            orchestrator_url: None,
            orchestrator_token: None,
            state_dir: core.state_dir,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REVERIE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_PUBLIC_HOST") {
            if !val.is_empty() {
                self.public_host = val;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_PRODUCER_TOKEN") {
            if !val.is_empty() {
                self.producer_token = Some(val);
            }
        }
        if let Ok(val) = std::env::var("REVERIE_SHUTDOWN_DELAY") {
            if let Ok(secs) = val.parse() {
                self.shutdown_delay_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_API_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.api_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_FRAME_CACHE_SIZE") {
            if let Ok(size) = val.parse() {
                self.frame_cache_size = size;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_RATE_LIMIT_REQUESTS") {
            if let Ok(limit) = val.parse() {
                self.rate_limit_requests = limit;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_RATE_LIMIT_WINDOW") {
            if let Ok(secs) = val.parse() {
                self.rate_limit_window_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("REVERIE_ORCHESTRATOR_URL") {
            if !val.is_empty() {
                self.orchestrator_url = Some(val);
            }
        }
        if let Ok(val) = std::env::var("REVERIE_ORCHESTRATOR_TOKEN") {
            if !val.is_empty() {
                self.orchestrator_token = Some(val);
            }
        }

        // Note: REVERIE_STATE_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to reverie-core's Config type.
    pub fn to_core_config(&self) -> reverie_core::Config {
        reverie_core::Config {
            bind_port: self.bind_port,
            public_host: self.public_host.clone(),
            producer_token: self.producer_token.clone(),
            shutdown_delay_secs: self.shutdown_delay_secs,
            api_timeout_secs: self.api_timeout_secs,
            frame_cache_size: self.frame_cache_size,
            rate_limit_requests: self.rate_limit_requests,
            rate_limit_window_secs: self.rate_limit_window_secs,
            orchestrator_url: self.orchestrator_url.clone(),
            orchestrator_token: self.orchestrator_token.clone(),
            state_dir: self.state_dir.clone(),
        }
    }
}
