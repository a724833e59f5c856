//! Network configuration context for the streaming server.
//!
//! This module provides [`NetworkContext`] which bundles the public address
//! information used to construct the URLs handed out by the embed endpoint,
//! and [`UrlBuilder`] which does the actual formatting.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// Network configuration shared across services.
///
/// Bundles the bind port and public hostname that handlers need when
/// constructing viewer-facing URLs. The port starts at the configured value
/// and is confirmed (or replaced, for port 0 binds) once the listener is up.
#[derive(Clone)]
pub struct NetworkContext {
    /// Server port (0 until bound when auto-assigned).
    pub port: Arc<RwLock<u16>>,
    /// Notifier signaled when the port is assigned.
    pub port_notify: Arc<Notify>,
    /// Public hostname viewers reach the service at.
    pub public_host: Arc<RwLock<String>>,
}

impl NetworkContext {
    /// Creates a `NetworkContext` with explicit configuration.
    #[must_use]
    pub fn explicit(bind_port: u16, public_host: impl Into<String>) -> Self {
        Self {
            port: Arc::new(RwLock::new(bind_port)),
            port_notify: Arc::new(Notify::new()),
            public_host: Arc::new(RwLock::new(public_host.into())),
        }
    }

    /// Creates a `NetworkContext` for testing.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit(8080, "localhost")
    }

    /// Returns the current port value.
    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    /// Returns the current public hostname.
    #[must_use]
    pub fn get_public_host(&self) -> String {
        self.public_host.read().clone()
    }

    /// Sets the port and notifies waiters.
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
        self.port_notify.notify_waiters();
    }

    /// Returns a `UrlBuilder` for the current network configuration.
    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.get_public_host(), self.get_port())
    }
}

/// Builder for constructing URLs for the streaming server.
pub struct UrlBuilder {
    host: String,
    port: u16,
}

impl UrlBuilder {
    /// Creates a new `UrlBuilder` for the given public address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the base HTTP URL (e.g. `http://dreams.example.net:8080`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Returns the viewer WebSocket URL.
    #[must_use]
    pub fn viewer_socket_url(&self) -> String {
        format!("ws://{}:{}/ws/dreams", self.host, self.port)
    }

    /// Returns the URL serving the current frame as an image.
    #[must_use]
    pub fn current_frame_url(&self) -> String {
        format!("{}/api/dreams/current", self.base_url())
    }

    /// Returns the status endpoint URL.
    #[must_use]
    pub fn status_url(&self) -> String {
        format!("{}/api/dreams/status", self.base_url())
    }

    /// Returns the URL of the embeddable viewer page.
    #[must_use]
    pub fn embed_page_url(&self) -> String {
        format!("{}/dreams/embed", self.base_url())
    }
}
