// Platform API client
//
// GraphQL calls used to provision a remote builder and to watch its
// instance come up.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{InstanceMonitor, ProvisionedBuilder, RemoteProvisioner};
use crate::config::BuilderConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How often instance status is polled while waiting for it to run
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

const ENSURE_REMOTE_BUILDER: &str = r#"
mutation($input: EnsureRemoteBuilderInput!) {
  ensureRemoteBuilder(input: $input) {
    url
    app { name }
  }
}
"#;

const APP_STATUS: &str = r#"
query($appName: String!) {
  app(name: $appName) {
    status
    allocations { id status }
  }
}
"#;

#[derive(Deserialize)]
struct GraphResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnsureRemoteBuilderData {
    ensure_remote_builder: EnsureRemoteBuilderPayload,
}

#[derive(Deserialize)]
struct EnsureRemoteBuilderPayload {
    url: String,
    app: AppName,
}

#[derive(Deserialize)]
struct AppName {
    name: String,
}

#[derive(Deserialize)]
struct AppStatusData {
    app: AppStatus,
}

#[derive(Deserialize)]
struct AppStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    allocations: Vec<Allocation>,
}

#[derive(Deserialize)]
struct Allocation {
    #[allow(dead_code)]
    id: String,
    status: String,
}

/// Platform API client implementing both remote collaborators
#[derive(Clone)]
pub struct PlatformApi {
    client: Client,
    endpoint: String,
    token: String,
}

impl PlatformApi {
    pub fn new(config: &BuilderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/graphql", config.api_base_url.trim_end_matches('/')),
            token: config.api_token.clone(),
        })
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("Failed to send request to platform API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Platform API request failed\n\nStatus: {}\nBody: {}", status, body);
        }

        let parsed: GraphResponse<T> = response
            .json()
            .await
            .context("Failed to parse platform API response")?;

        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            bail!("{}", messages.join("; "));
        }

        parsed
            .data
            .ok_or_else(|| anyhow::anyhow!("Platform API returned no data"))
    }
}

#[async_trait]
impl RemoteProvisioner for PlatformApi {
    async fn ensure_remote_builder(&self, app_name: &str) -> Result<ProvisionedBuilder> {
        let data: EnsureRemoteBuilderData = self
            .query(ENSURE_REMOTE_BUILDER, json!({ "input": { "appName": app_name } }))
            .await?;

        Ok(ProvisionedBuilder {
            url: data.ensure_remote_builder.url,
            app_name: data.ensure_remote_builder.app.name,
        })
    }
}

#[async_trait]
impl InstanceMonitor for PlatformApi {
    async fn wait_for_running(
        &self,
        cancel: &CancellationToken,
        app_name: &str,
        timeout: Duration,
        on_status: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut last_status = String::new();

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => bail!("canceled"),
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
                result = self.query::<AppStatusData>(APP_STATUS, json!({ "appName": app_name })) => result,
            };

            match result {
                Ok(data) => {
                    if data.app.allocations.iter().any(|a| a.status == "running") {
                        return Ok(true);
                    }

                    let status = data
                        .app
                        .allocations
                        .first()
                        .map(|a| a.status.clone())
                        .unwrap_or(data.app.status);
                    if status != last_status {
                        debug!(app = %app_name, status = %status, "Remote builder status");
                        on_status(&status);
                        last_status = status;
                    }
                }
                // Transient; the deadline bounds how long we keep asking
                Err(e) => {
                    debug!(app = %app_name, "Remote builder status check failed, retrying: {:#}", e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => bail!("canceled"),
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
                _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn api_for(server: &mockito::Server) -> PlatformApi {
        let config = BuilderConfig {
            api_base_url: server.url(),
            api_token: "tok".into(),
            ..Default::default()
        };
        PlatformApi::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_remote_builder() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                r#"{"data":{"ensureRemoteBuilder":{"url":"https://fly-builder-x.fly.dev","app":{"name":"fly-builder-x"}}}}"#,
            )
            .create_async()
            .await;

        let builder = api_for(&server).ensure_remote_builder("my-app").await.unwrap();
        assert_eq!(builder.url, "https://fly-builder-x.fly.dev");
        assert_eq!(builder.app_name, "fly-builder-x");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_graphql_errors_surface() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":null,"errors":[{"message":"Could not resolve App"}]}"#)
            .create_async()
            .await;

        let err = api_for(&server)
            .ensure_remote_builder("missing")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Could not resolve App"));
    }

    #[tokio::test]
    async fn test_wait_for_running_returns_once_running() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(
                r#"{"data":{"app":{"status":"deployed","allocations":[{"id":"a1","status":"running"}]}}}"#,
            )
            .create_async()
            .await;

        let seen = Mutex::new(Vec::new());
        let running = api_for(&server)
            .wait_for_running(
                &CancellationToken::new(),
                "fly-builder-x",
                Duration::from_secs(5),
                &|s: &str| seen.lock().unwrap().push(s.to_string()),
            )
            .await
            .unwrap();

        assert!(running);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_running_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(
                r#"{"data":{"app":{"status":"pending","allocations":[{"id":"a1","status":"starting"}]}}}"#,
            )
            .expect_at_least(1)
            .create_async()
            .await;

        let seen = Mutex::new(Vec::new());
        let running = api_for(&server)
            .wait_for_running(
                &CancellationToken::new(),
                "fly-builder-x",
                Duration::from_millis(300),
                &|s: &str| seen.lock().unwrap().push(s.to_string()),
            )
            .await
            .unwrap();

        assert!(!running);
        assert_eq!(seen.lock().unwrap().as_slice(), ["starting".to_string()]);
    }

    #[tokio::test]
    async fn test_wait_for_running_survives_transient_error() {
        let mut server = mockito::Server::new_async().await;
        let flaky = server
            .mock("POST", "/graphql")
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(
                r#"{"data":{"app":{"status":"deployed","allocations":[{"id":"a1","status":"running"}]}}}"#,
            )
            .create_async()
            .await;

        let running = api_for(&server)
            .wait_for_running(
                &CancellationToken::new(),
                "fly-builder-x",
                Duration::from_secs(30),
                &|_: &str| {},
            )
            .await
            .unwrap();

        assert!(running);
        flaky.assert_async().await;
    }

    #[tokio::test]
    async fn test_wait_for_running_stops_on_cancel() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(
                r#"{"data":{"app":{"status":"pending","allocations":[{"id":"a1","status":"starting"}]}}}"#,
            )
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let err = api_for(&server)
            .wait_for_running(&cancel, "fly-builder-x", Duration::from_secs(60), &|_: &str| {})
            .await
            .unwrap_err();

        assert!(err.to_string().contains("canceled"));
        // Well inside one status poll interval
        assert!(start.elapsed() < STATUS_POLL_INTERVAL);
    }
}
