// Remote builder collaborators
//
// Traits for the platform operations the connection factory depends on
// (provisioning a builder, waiting for its instance), the endpoint resolver
// built on top of them, and a GraphQL-backed implementation.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod platform_api;
pub mod resolver;

pub use platform_api::PlatformApi;
pub use resolver::{builder_host, EndpointResolver, RemoteEndpoint, DEFAULT_BUILDER_PORT};

/// A builder the platform created (or already had) for an app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedBuilder {
    /// Raw builder URL, e.g. `https://fly-builder-abc.fly.dev`
    pub url: String,
    /// Name of the app hosting the builder
    pub app_name: String,
}

/// Creates or looks up the remote builder for an app
#[async_trait]
pub trait RemoteProvisioner: Send + Sync {
    async fn ensure_remote_builder(&self, app_name: &str) -> Result<ProvisionedBuilder>;
}

/// Waits for a builder app's instance to report running
#[async_trait]
pub trait InstanceMonitor: Send + Sync {
    /// Returns `Ok(false)` if the instance didn't start within `timeout`.
    /// `on_status` receives each observed status string.
    async fn wait_for_running(
        &self,
        cancel: &CancellationToken,
        app_name: &str,
        timeout: Duration,
        on_status: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<bool>;
}
