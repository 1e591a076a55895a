// Connection factory
//
// Picks a daemon mode once (local handshake first when allowed, then remote),
// and hands out a single memoized client for that mode. Remote clients are
// only exposed after the builder instance is running and the readiness
// poller is satisfied.

use anyhow::Result as AnyResult;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::DaemonClient;
use crate::config::{BuilderConfig, LocalFallbackPolicy};
use crate::daemon::{DaemonMode, DaemonType};
use crate::errors::ConnectError;
use crate::progress::{ProgressSink, TerminalProgress};
use crate::readiness::{PollOutcome, ReadinessPoller};
use crate::remote::{EndpointResolver, InstanceMonitor, PlatformApi, RemoteProvisioner};

/// Collaborators needed to bring up a remote builder
#[derive(Clone)]
pub struct RemoteDeps {
    pub provisioner: Arc<dyn RemoteProvisioner>,
    pub monitor: Arc<dyn InstanceMonitor>,
    pub progress: Arc<dyn ProgressSink>,
}

impl RemoteDeps {
    pub fn new(
        provisioner: Arc<dyn RemoteProvisioner>,
        monitor: Arc<dyn InstanceMonitor>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            provisioner,
            monitor,
            progress,
        }
    }

    /// Platform API for both collaborators, terminal progress
    pub fn platform(config: &BuilderConfig) -> AnyResult<Self> {
        let api = Arc::new(PlatformApi::new(config)?);
        Ok(Self {
            provisioner: api.clone(),
            monitor: api,
            progress: Arc::new(TerminalProgress::new()),
        })
    }
}

/// Hands out the daemon client for one build invocation
pub struct ConnectionFactory {
    mode: DaemonMode,
    app_name: String,
    config: BuilderConfig,
    remote: RemoteDeps,
    client: OnceCell<Arc<DaemonClient>>,
}

impl ConnectionFactory {
    /// Decide the daemon mode
    ///
    /// A local daemon that answers the handshake wins outright. A local
    /// daemon that is simply absent falls through to remote. Other local
    /// failures fall through too unless the policy is `WhenAbsent`.
    pub async fn new(
        daemon_type: DaemonType,
        app_name: impl Into<String>,
        config: BuilderConfig,
        remote: RemoteDeps,
    ) -> Result<Self, ConnectError> {
        let client = OnceCell::new();

        let mode = if daemon_type.allow_local() {
            debug!("trying local docker daemon");
            match DaemonClient::connect_local(&config.local_docker_host).await {
                Ok(local) => {
                    let _ = client.set(Arc::new(local));
                    DaemonMode::Local
                }
                Err(e) if e.is_connection_failed() => {
                    debug!(error = %e, "Local docker daemon unavailable");
                    Self::remote_or_unavailable(daemon_type)
                }
                Err(e) => {
                    warn!("Error connecting to local docker daemon: {}", e);
                    if config.local_fallback == LocalFallbackPolicy::WhenAbsent {
                        return Err(ConnectError::LocalUnavailable(e.to_string()));
                    }
                    Self::remote_or_unavailable(daemon_type)
                }
            }
        } else {
            Self::remote_or_unavailable(daemon_type)
        };

        if mode == DaemonMode::Remote {
            debug!("trying remote docker daemon");
        }

        Ok(Self {
            mode,
            app_name: app_name.into(),
            config,
            remote,
            client,
        })
    }

    fn remote_or_unavailable(daemon_type: DaemonType) -> DaemonMode {
        if daemon_type.allow_remote() {
            DaemonMode::Remote
        } else {
            DaemonMode::Unavailable
        }
    }

    pub fn mode(&self) -> DaemonMode {
        self.mode
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Whether a client has already been built
    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    /// Get the daemon client, building it on first use
    ///
    /// Later calls return the same client without touching the network.
    /// Failures are not cached; the next call starts over. Concurrent first
    /// calls are serialized by the cell, so the build runs once.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<DaemonClient>, ConnectError> {
        match self.mode {
            DaemonMode::Unavailable => Err(ConnectError::NoDaemonAvailable),
            DaemonMode::Local => self
                .client
                .get()
                .cloned()
                .ok_or(ConnectError::NoDaemonAvailable),
            DaemonMode::Remote => self
                .client
                .get_or_try_init(|| self.build_remote(cancel))
                .await
                .cloned(),
        }
    }

    async fn build_remote(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<DaemonClient>, ConnectError> {
        if cancel.is_cancelled() {
            return Err(ConnectError::Canceled);
        }

        let resolver = EndpointResolver::new(&self.config, self.remote.provisioner.as_ref());
        let endpoint = resolver.resolve(&self.app_name).await?;

        let client = Arc::new(DaemonClient::remote(
            &endpoint.host,
            &self.app_name,
            &self.config,
        )?);

        if !endpoint.is_provisioned() {
            self.wait_for_daemon(&client, cancel).await?;
            return Ok(client);
        }

        let builder = endpoint.app_name.as_str();
        let progress = self.remote.progress.as_ref();
        progress.start(&format!("Waiting for remote builder {}...", builder));

        let result = async {
            self.wait_for_instance(builder, cancel).await?;
            self.wait_for_daemon(&client, cancel).await
        }
        .await;

        match &result {
            Ok(()) => progress.finish(&format!("Remote builder {} ready", builder)),
            Err(_) => progress.finish(&format!("Remote builder {} unavailable", builder)),
        }
        result.map(|()| client)
    }

    async fn wait_for_instance(
        &self,
        builder: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        let progress = self.remote.progress.as_ref();
        let on_status = |status: &str| {
            progress.update(&format!("Waiting for remote builder {}... {}", builder, status));
        };

        let launched = self
            .remote
            .monitor
            .wait_for_running(cancel, builder, self.config.instance_start_timeout, &on_status)
            .await;

        match launched {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    "Remote builder did not start on time. Check remote builder logs with `flyctl logs -a {}`",
                    builder
                );
                Err(ConnectError::InstanceNotRunning {
                    app: builder.to_string(),
                })
            }
            Err(_) if cancel.is_cancelled() => Err(ConnectError::Canceled),
            Err(e) => Err(ConnectError::InstanceWait(format!("{:#}", e))),
        }
    }

    async fn wait_for_daemon(
        &self,
        client: &Arc<DaemonClient>,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        let poller = ReadinessPoller::new(self.config.readiness.clone());
        match poller.wait(client.clone(), cancel).await {
            Ok(PollOutcome::Ready) => Ok(()),
            Ok(PollOutcome::Canceled) => Err(ConnectError::Canceled),
            Err(e) => Err(e),
        }
    }
}
