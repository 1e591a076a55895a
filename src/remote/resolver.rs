// Remote builder endpoint resolution
//
// Either the configured override host (used verbatim) or a freshly
// provisioned builder whose URL is normalized to tcp://host:port.

use std::fmt;
use tracing::debug;
use url::Url;

use super::RemoteProvisioner;
use crate::config::BuilderConfig;
use crate::errors::ConnectError;

/// Port remote builders listen on when the URL doesn't say
pub const DEFAULT_BUILDER_PORT: u16 = 10000;

/// Where to reach a remote builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Connectable docker host, e.g. `tcp://host:10000`
    pub host: String,
    /// Builder app to wait on; empty when the host came from an override
    pub app_name: String,
}

impl RemoteEndpoint {
    /// Whether the instance-running wait applies
    pub fn is_provisioned(&self) -> bool {
        !self.app_name.is_empty()
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.app_name.is_empty() {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{} ({})", self.host, self.app_name)
        }
    }
}

/// Resolves the endpoint for an app's remote builder
pub struct EndpointResolver<'a> {
    config: &'a BuilderConfig,
    provisioner: &'a dyn RemoteProvisioner,
}

impl<'a> EndpointResolver<'a> {
    pub fn new(config: &'a BuilderConfig, provisioner: &'a dyn RemoteProvisioner) -> Self {
        Self {
            config,
            provisioner,
        }
    }

    pub async fn resolve(&self, app_name: &str) -> Result<RemoteEndpoint, ConnectError> {
        if let Some(host) = self
            .config
            .remote_builder_host
            .as_deref()
            .filter(|h| !h.is_empty())
        {
            debug!(host = %host, "Using remote builder host override");
            return Ok(RemoteEndpoint {
                host: host.to_string(),
                app_name: String::new(),
            });
        }

        let provisioned = self
            .provisioner
            .ensure_remote_builder(app_name)
            .await
            .map_err(|e| ConnectError::ProvisioningFailed(format!("{:#}", e)))?;

        let host = builder_host(&provisioned.url)?;
        debug!(host = %host, app = %provisioned.app_name, "Remote Docker builder host");

        Ok(RemoteEndpoint {
            host,
            app_name: provisioned.app_name,
        })
    }
}

/// Normalize a provisioned builder URL to `tcp://host:port`
pub fn builder_host(raw_url: &str) -> Result<String, ConnectError> {
    let invalid = |reason: String| ConnectError::InvalidBuilderUrl {
        url: raw_url.to_string(),
        reason,
    };

    let parsed = Url::parse(raw_url).map_err(|e| invalid(e.to_string()))?;
    let host = parsed
        .host()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    // Url drops a port equal to the scheme default, so read it from the
    // authority as written. Only a missing port becomes the builder default.
    let port = raw_url
        .parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.port_u16())
        .unwrap_or(DEFAULT_BUILDER_PORT);

    // url::Host's Display brackets IPv6 addresses, which is what host:port needs
    Ok(format!("tcp://{}:{}", host, port))
}
