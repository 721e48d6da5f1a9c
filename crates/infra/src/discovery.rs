//! File-backed service discovery
//!
//! Endpoints are declared in a static JSON registry keyed by service
//! type. A sidecar `active_services.json` file, when present, takes
//! precedence: it carries the instances registered at runtime and
//! replaces the static candidate list. Discovery walks the candidates
//! in declaration order and returns the first endpoint whose `/health`
//! probe answers 200.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::InfraError;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One registered service instance
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Base URL for this instance's RPC surface
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}/rpc", self.host, self.port)
    }

    fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    endpoints: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    services: HashMap<String, ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ActiveFile {
    services: Vec<Endpoint>,
}

/// Health-probing view over the JSON service registry
pub struct ServiceRegistry {
    registry_path: PathBuf,
    active_path: PathBuf,
    http: reqwest::Client,
}

impl ServiceRegistry {
    /// Open a registry rooted at the given JSON file
    ///
    /// The active-services override is expected as
    /// `active_services.json` next to the registry file.
    pub fn open(registry_path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let registry_path = registry_path.as_ref().to_path_buf();
        let active_path = registry_path
            .parent()
            .map(|dir| dir.join("active_services.json"))
            .unwrap_or_else(|| PathBuf::from("active_services.json"));

        let http = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .map_err(|e| InfraError::Network(e.to_string()))?;

        Ok(Self { registry_path, active_path, http })
    }

    /// Candidate endpoints for a service type: runtime registrations
    /// when the active-services file exists, otherwise the static
    /// registry entry
    ///
    /// Both files are re-read on every call so edits take effect
    /// without a restart.
    pub fn candidates(&self, service_type: &str) -> Result<Vec<Endpoint>, InfraError> {
        if let Some(active) = self.active_endpoints() {
            return Ok(active);
        }

        let raw = std::fs::read_to_string(&self.registry_path).map_err(|e| {
            InfraError::Registry(format!("{}: {e}", self.registry_path.display()))
        })?;
        let registry: RegistryFile = serde_json::from_str(&raw)
            .map_err(|e| InfraError::Registry(format!("{}: {e}", self.registry_path.display())))?;

        Ok(registry
            .services
            .get(service_type)
            .map(|entry| entry.endpoints.clone())
            .unwrap_or_default())
    }

    /// Resolve the RPC URL of the first healthy instance
    pub async fn discover(&self, service_type: &str) -> Result<String, InfraError> {
        let candidates = self.candidates(service_type)?;
        if candidates.is_empty() {
            warn!(service_type, "no endpoints registered for service type");
        }

        for endpoint in &candidates {
            if self.is_healthy(endpoint).await {
                debug!(
                    service_type,
                    host = %endpoint.host,
                    port = endpoint.port,
                    "selected healthy endpoint"
                );
                return Ok(endpoint.rpc_url());
            }
        }

        Err(InfraError::NoHealthyEndpoint { service_type: service_type.to_string() })
    }

    async fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        match self.http.get(endpoint.health_url()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(
                    host = %endpoint.host,
                    port = endpoint.port,
                    status = response.status().as_u16(),
                    "health probe answered non-success"
                );
                false
            }
            Err(err) => {
                debug!(host = %endpoint.host, port = endpoint.port, error = %err, "health probe failed");
                false
            }
        }
    }

    /// The runtime registrations, or `None` when the sidecar file is
    /// absent or unreadable (an unreadable override must not mask the
    /// static registry)
    fn active_endpoints(&self) -> Option<Vec<Endpoint>> {
        let raw = std::fs::read_to_string(&self.active_path).ok()?;
        match serde_json::from_str::<ActiveFile>(&raw) {
            Ok(active) => Some(active.services),
            Err(err) => {
                warn!(path = %self.active_path.display(), error = %err, "ignoring malformed active-services file");
                None
            }
        }
    }
}
