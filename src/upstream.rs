//! HTTP client for upstream registry communication.
//!
//! Remote (proxy-cache) repositories use this client to fetch project
//! listings and distribution files from the registry they front. Every call
//! is bounded by the configured timeout; a timeout is treated identically to
//! any other fetch failure so callers can fall back to stale cache entries.
//!
//! Failure mapping matters here: an upstream 404 means "the project does not
//! exist" and surfaces as `NotFound`, while connection failures and timeouts
//! mean "could not be determined right now" and surface as
//! `UpstreamUnavailable`.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Media type of the machine-readable simple index (PEP 691).
pub const SIMPLE_JSON_MEDIA_TYPE: &str = "application/vnd.pypi.simple.v1+json";

/// Configuration for upstream registry communication.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// HTTP request timeout for upstream calls
    pub timeout: Duration,
    /// User agent presented to upstream registries
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("pkg-depot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One file row in an upstream project listing.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFile {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(rename = "requires-python", default)]
    pub requires_python: Option<String>,
}

/// A parsed upstream project listing (PEP 691 project page).
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamProject {
    pub name: String,
    #[serde(default)]
    pub files: Vec<UpstreamFile>,
}

/// HTTP client for fetching project indexes and files from upstream
/// registries.
///
/// # Examples
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use pkg_depot::upstream::{UpstreamClient, UpstreamConfig};
///
/// let client = UpstreamClient::new(UpstreamConfig::default())?;
/// let listing = client
///     .fetch_project_index("https://pypi.org/simple", "requests")
///     .await?;
/// let bytes = client.fetch_file(&listing.files[0].url).await?;
/// # Ok(())
/// # }
/// ```
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    /// Create a new upstream client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(config: UpstreamConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch and parse the machine-readable project index for one project.
    ///
    /// Issues `GET {base_url}/{project}/` with the PEP 691 Accept header and
    /// parses the JSON listing.
    ///
    /// # Errors
    ///
    /// * `NotFound` when the upstream answers 404 — the project does not
    ///   exist there
    /// * `UpstreamUnavailable` on connection failure, timeout or any other
    ///   upstream error
    pub async fn fetch_project_index(
        &self,
        base_url: &str,
        project: &str,
    ) -> AppResult<UpstreamProject> {
        let url = format!("{}/{}/", base_url.trim_end_matches('/'), project);
        debug!(url = %url, "Fetching upstream project index");

        let response = self
            .client
            .get(&url)
            .header("Accept", SIMPLE_JSON_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Failed to reach upstream registry");
                AppError::UpstreamUnavailable(format!("Failed to reach upstream: {e}"))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!(
                "Project not found on upstream: {project}"
            )));
        }
        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "Upstream returned {} for project {project}",
                response.status()
            )));
        }

        let listing: UpstreamProject = response.json().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to parse upstream listing: {e}"))
        })?;
        info!(project = %project, files = listing.files.len(), "Fetched upstream project index");
        Ok(listing)
    }

    /// Fetch a distribution file from its upstream URL.
    ///
    /// # Errors
    ///
    /// Same classification as [`fetch_project_index`](Self::fetch_project_index).
    pub async fn fetch_file(&self, url: &str) -> AppResult<bytes::Bytes> {
        debug!(url = %url, "Fetching file from upstream");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to fetch file from upstream");
            AppError::UpstreamUnavailable(format!("Failed to reach upstream: {e}"))
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("File not found on upstream: {url}")));
        }
        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "Upstream returned {} for file {url}",
                response.status()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            AppError::UpstreamUnavailable(format!("Failed to read upstream response: {e}"))
        })?;
        info!(url = %url, size = bytes.len(), "Fetched file from upstream");
        Ok(bytes)
    }
}
