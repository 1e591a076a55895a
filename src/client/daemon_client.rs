// Daemon client implementation
//
// Docker Engine API client for a local or remote build daemon. The API version
// is negotiated from the daemon's /_ping response on first use.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::transport::{basic_auth, Transport, TransportOptions};
use crate::config::BuilderConfig;
use crate::errors::ConnectError;

/// Newest API version this client speaks
pub const CLIENT_API_VERSION: &str = "1.41";

/// Version assumed when the daemon doesn't advertise one
const FALLBACK_API_VERSION: &str = "1.24";

/// Liveness check against a daemon
///
/// Implemented by `DaemonClient`; the readiness poller only needs this.
#[async_trait]
pub trait DaemonPing: Send + Sync {
    async fn ping(&self) -> Result<(), ConnectError>;
}

/// Subset of `GET /version`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerVersion {
    pub version: String,
    pub api_version: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageSummary {
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
}

/// Client for one daemon endpoint
#[derive(Debug)]
pub struct DaemonClient {
    endpoint: String,
    transport: Transport,
    api_version: OnceCell<String>,
}

impl DaemonClient {
    /// Client for the local daemon at `host` (no handshake yet)
    pub fn local(host: &str) -> Result<Self, ConnectError> {
        let transport = Transport::build(host, &TransportOptions::default())?;
        Ok(Self::with_transport(host, transport))
    }

    /// Connect to the local daemon: negotiate the API version and ping it
    pub async fn connect_local(host: &str) -> Result<Self, ConnectError> {
        let client = Self::local(host)?;
        client.negotiate_api_version().await?;
        client.ping().await?;
        info!(host = %host, "Connected to local docker daemon");
        Ok(client)
    }

    /// Client for a remote builder endpoint, authenticated as `app_name`
    pub fn remote(
        endpoint: &str,
        app_name: &str,
        config: &BuilderConfig,
    ) -> Result<Self, ConnectError> {
        let options = TransportOptions {
            tls: !config.remote_builder_no_tls,
            authorization: Some(basic_auth(app_name, &config.api_token)),
        };
        let transport = Transport::build(endpoint, &options)?;
        Ok(Self::with_transport(endpoint, transport))
    }

    fn with_transport(endpoint: &str, transport: Transport) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            transport,
            api_version: OnceCell::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Negotiated API version, if the daemon has been reached yet
    pub fn api_version(&self) -> Option<&str> {
        self.api_version.get().map(String::as_str)
    }

    /// Negotiate once; later calls return the cached version
    pub async fn negotiate_api_version(&self) -> Result<&str, ConnectError> {
        let version = self
            .api_version
            .get_or_try_init(|| async {
                let response = self
                    .transport
                    .request(Method::GET, "/_ping", &[])
                    .await?
                    .error_for_status()?;
                let version = negotiate(response.header("API-Version"));
                debug!(endpoint = %self.endpoint, version = %version, "Negotiated API version");
                Ok::<_, ConnectError>(version)
            })
            .await?;
        Ok(version.as_str())
    }

    async fn versioned_path(&self, path: &str) -> Result<String, ConnectError> {
        let version = self.negotiate_api_version().await?;
        Ok(format!("/v{}{}", version, path))
    }

    /// `GET /version`
    pub async fn server_version(&self) -> Result<ServerVersion, ConnectError> {
        let path = self.versioned_path("/version").await?;
        let response = self
            .transport
            .request(Method::GET, &path, &[])
            .await?
            .error_for_status()?;
        serde_json::from_slice(&response.body).map_err(|e| ConnectError::Http {
            status: response.status,
            message: format!("invalid version payload: {}", e),
        })
    }

    /// Remove every local image tagged with `tag`
    ///
    /// Individual removal failures are logged and skipped.
    pub async fn clear_deployment_tags(&self, tag: &str) -> Result<(), ConnectError> {
        let filters = serde_json::json!({ "reference": [tag] }).to_string();
        let list_path = self.versioned_path("/images/json").await?;
        let response = self
            .transport
            .request(Method::GET, &list_path, &[("filters", filters.as_str())])
            .await?
            .error_for_status()?;

        let images: Vec<ImageSummary> =
            serde_json::from_slice(&response.body).map_err(|e| ConnectError::Http {
                status: response.status,
                message: format!("invalid image list: {}", e),
            })?;

        for repo_tag in images.into_iter().flat_map(|i| i.repo_tags.unwrap_or_default()) {
            let path = self.versioned_path(&format!("/images/{}", repo_tag)).await?;
            let removed = self
                .transport
                .request(Method::DELETE, &path, &[])
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = removed {
                debug!(tag = %repo_tag, error = %e, "Error deleting image");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DaemonPing for DaemonClient {
    async fn ping(&self) -> Result<(), ConnectError> {
        let response = self
            .transport
            .request(Method::GET, "/_ping", &[])
            .await?
            .error_for_status()?;

        if self.api_version.get().is_none() {
            let _ = self.api_version.set(negotiate(response.header("API-Version")));
        }
        Ok(())
    }
}

/// Pick the lower of the daemon's advertised version and ours
fn negotiate(server: Option<&str>) -> String {
    let server = match server {
        Some(v) if !v.is_empty() => v,
        _ => FALLBACK_API_VERSION,
    };

    match (parse_version(server), parse_version(CLIENT_API_VERSION)) {
        (Some(s), Some(c)) if s < c => server.to_string(),
        (Some(_), Some(_)) => CLIENT_API_VERSION.to_string(),
        _ => FALLBACK_API_VERSION.to_string(),
    }
}

fn parse_version(v: &str) -> Option<(u32, u32)> {
    let (major, minor) = v.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
