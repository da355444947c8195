//! Container registry client.
//!
//! Read-only introspection of a Docker Registry HTTP API v2, used to confirm
//! that a pushed tag is listed.
//! See <https://distribution.github.io/distribution/spec/api/>.

use async_trait::async_trait;
use dockyard_core::registry::{ImageRegistry, RegistryAuth, TagList};
use dockyard_core::{Error, Result, Submission, TeamId};
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a single registry.
pub struct RegistryClient {
    client: reqwest::Client,
    scheme: String,
    address: String,
    username: Option<String>,
    password: Option<String>,
}

impl RegistryClient {
    /// Create a client for the registry at `address` (`host:port`).
    pub fn new(scheme: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        Self::with_timeout(scheme, address, DEFAULT_TIMEOUT)
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(
        scheme: impl Into<String>,
        address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build registry client: {}", e)))?;
        Ok(Self {
            client,
            scheme: scheme.into(),
            address: address.into(),
            username: None,
            password: None,
        })
    }

    /// Push and list tags with these credentials instead of anonymously.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn tags_url(&self, team_id: TeamId) -> String {
        format!(
            "{}://{}/v2/{}/tags/list",
            self.scheme,
            self.address,
            Submission::repository(team_id)
        )
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn auth_header(&self) -> RegistryAuth {
        RegistryAuth {
            server_address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    async fn list_tags(&self, team_id: TeamId) -> Result<TagList> {
        let url = self.tags_url(team_id);
        debug!(url = %url, "Listing registry tags");

        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            request = request.basic_auth(username, Some(password));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Unreachable(format!("{}: {}", url, e)))?;

        // Error responses still carry a JSON body with an `errors` array
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Unreachable(format!("{}: {}", url, e)))?;

        serde_json::from_str(&body).map_err(|e| {
            Error::Registry(format!(
                "unexpected response from {} ({}): {}",
                url, status, e
            ))
        })
    }
}
