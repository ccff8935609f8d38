//! Rental Registry REST Client
//!
//! Provides HTTP integration for the internal rentals registry:
//! - `POST /internal/rentals` with `{"id", "price"}` (upsert keyed by id)
//! - `DELETE /internal/rentals/{id}` (idempotent delete)
//!
//! Only `200 OK` counts as accepted. The inbound `baggage` header is
//! forwarded verbatim so downstream traces stay correlated with the
//! originating record.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use movies_exec::{ExecError, ExecResult, RegistryAck, RegistryPort, RentalUpsert};

// =============================================================================
// Constants
// =============================================================================

/// Registry base URL inside the cluster
pub const DEFAULT_REGISTRY_URL: &str = "http://api:8080";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Header propagated to the registry
const BAGGAGE_HEADER: &str = "baggage";

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the registry REST client.
#[derive(Debug, Clone, Error)]
pub enum RegistryRestError {
    /// Base URL could not be parsed or extended
    #[error("Invalid registry URL: {0}")]
    InvalidUrl(String),

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Registry answered with a status other than 200
    #[error("Registry returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Request timed out
    #[error("Request timed out")]
    Timeout,
}

impl From<RegistryRestError> for ExecError {
    fn from(err: RegistryRestError) -> Self {
        match err {
            RegistryRestError::UnexpectedStatus { status, .. } => ExecError::Rejected { status },
            RegistryRestError::Timeout => ExecError::Timeout(err.to_string()),
            RegistryRestError::InvalidUrl(_) | RegistryRestError::RequestFailed(_) => {
                ExecError::Transport(err.to_string())
            }
        }
    }
}

// =============================================================================
// Registry REST Client
// =============================================================================

/// HTTP client for the rentals registry.
///
/// Cheap to share: the underlying `reqwest::Client` pools connections and
/// tolerates concurrent use from every partition lane.
#[derive(Debug, Clone)]
pub struct RegistryRestClient {
    /// HTTP client
    client: Client,
    /// Registry base URL
    base_url: Url,
    /// Per-request timeout
    request_timeout: Duration,
}

impl RegistryRestClient {
    /// Create a new registry client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Registry base URL (e.g. `http://api:8080`)
    pub fn new(base_url: &str) -> Result<Self, RegistryRestError> {
        let base_url =
            Url::parse(base_url).map_err(|e| RegistryRestError::InvalidUrl(e.to_string()))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Registry base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/internal/rentals[/{id}]`, escaping the id.
    fn rentals_url(&self, id: Option<&str>) -> Result<Url, RegistryRestError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RegistryRestError::InvalidUrl(format!("{} cannot be a base", self.base_url))
            })?;
            segments.pop_if_empty().extend(["internal", "rentals"]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Send a request and require `200 OK`.
    ///
    /// The timeout covers the whole exchange, including reading the body of
    /// a rejection.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        baggage: Option<&str>,
    ) -> Result<u16, RegistryRestError> {
        let request = match baggage.filter(|b| !b.is_empty()) {
            Some(baggage) => {
                debug!(%baggage, "Propagating baggage header to registry");
                request.header(BAGGAGE_HEADER, baggage)
            }
            None => request,
        };

        timeout(self.request_timeout, Self::exchange(request))
            .await
            .map_err(|_| RegistryRestError::Timeout)?
    }

    async fn exchange(request: reqwest::RequestBuilder) -> Result<u16, RegistryRestError> {
        let response = request
            .send()
            .await
            .map_err(|e| RegistryRestError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryRestError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(status.as_u16())
    }

    // =========================================================================
    // Rentals API
    // =========================================================================

    /// Create or update a rental.
    ///
    /// # Endpoint
    ///
    /// `POST /internal/rentals`
    pub async fn upsert(
        &self,
        rental: &RentalUpsert,
        baggage: Option<&str>,
    ) -> Result<u16, RegistryRestError> {
        let url = self.rentals_url(None)?;
        self.send(self.client.post(url).json(rental), baggage).await
    }

    /// Delete a rental by catalog id.
    ///
    /// # Endpoint
    ///
    /// `DELETE /internal/rentals/{id}`
    pub async fn delete(
        &self,
        catalog_id: &str,
        baggage: Option<&str>,
    ) -> Result<u16, RegistryRestError> {
        let url = self.rentals_url(Some(catalog_id))?;
        self.send(self.client.delete(url), baggage).await
    }
}

#[async_trait]
impl RegistryPort for RegistryRestClient {
    async fn upsert_rental(
        &self,
        rental: &RentalUpsert,
        baggage: Option<&str>,
    ) -> ExecResult<RegistryAck> {
        let status = self.upsert(rental, baggage).await?;
        Ok(RegistryAck {
            http_status: Some(status),
        })
    }

    async fn delete_rental(
        &self,
        catalog_id: &str,
        baggage: Option<&str>,
    ) -> ExecResult<RegistryAck> {
        let status = self.delete(catalog_id, baggage).await?;
        Ok(RegistryAck {
            http_status: Some(status),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
