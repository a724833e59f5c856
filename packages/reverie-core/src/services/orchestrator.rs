//! Orchestrator client for GPU pod lifecycle.
//!
//! The compute provider itself is fronted by an admin panel that centralizes
//! credentials and pod IDs; this module only makes HTTP calls against that
//! panel. The [`Orchestrator`] trait keeps the pod controller testable and
//! lets deployments without an orchestrator run with a disabled
//! implementation.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from orchestrator admin-API calls.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The HTTP request itself failed (connect error, timeout).
    #[error("orchestrator request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The admin panel answered with a non-success status.
    #[error("orchestrator returned {status}: {body}")]
    Api { status: u16, body: String },

    /// No orchestrator endpoint is configured.
    #[error("no orchestrator configured")]
    NotConfigured,
}

/// Reported status of one orchestrated sub-resource (pod).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default)]
    pub status: Option<String>,
}

impl ResourceStatus {
    fn is(&self, value: &str) -> bool {
        self.status.as_deref() == Some(value)
    }

    fn is_pending(&self) -> bool {
        matches!(self.status.as_deref(), Some("STARTING") | Some("CREATED"))
    }
}

/// Combined status of the two pods backing the dream window: the image
/// renderer and the generation driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    #[serde(default)]
    pub renderer: ResourceStatus,
    #[serde(default)]
    pub generator: ResourceStatus,
}

impl OrchestratorStatus {
    /// Both sub-resources report RUNNING.
    pub fn all_running(&self) -> bool {
        self.renderer.is("RUNNING") && self.generator.is("RUNNING")
    }

    /// Either sub-resource is still coming up.
    pub fn any_pending(&self) -> bool {
        self.renderer.is_pending() || self.generator.is_pending()
    }
}

/// External start/stop/status operations on the GPU pods.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Requests that the pods start.
    async fn start(&self) -> Result<(), OrchestratorError>;

    /// Requests that the pods stop.
    async fn stop(&self) -> Result<(), OrchestratorError>;

    /// Fetches the current pod statuses.
    async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError>;
}

/// Orchestrator backed by the admin panel's HTTP API.
pub struct AdminApiOrchestrator {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl AdminApiOrchestrator {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn request(&self, method: Method, path: &str) -> Result<reqwest::Response, OrchestratorError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Orchestrator for AdminApiOrchestrator {
    async fn start(&self) -> Result<(), OrchestratorError> {
        log::info!("[Orchestrator] requesting pod start");
        self.request(Method::POST, "/api/dreams/pods/start").await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), OrchestratorError> {
        log::info!("[Orchestrator] requesting pod stop");
        self.request(Method::POST, "/api/dreams/pods/stop").await?;
        Ok(())
    }

    async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        let response = self.request(Method::GET, "/api/dreams/pods/status").await?;
        Ok(response.json().await?)
    }
}

/// Placeholder used when no orchestrator endpoint is configured.
///
/// Every operation fails with [`OrchestratorError::NotConfigured`], which the
/// pod controller surfaces as an `Error` state on start attempts.
pub struct DisabledOrchestrator;

#[async_trait]
impl Orchestrator for DisabledOrchestrator {
    async fn start(&self) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::NotConfigured)
    }

    async fn stop(&self) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::NotConfigured)
    }

    async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
        Err(OrchestratorError::NotConfigured)
    }
}
