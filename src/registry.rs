// Registry and build-input helpers
//
// Small pieces the build pipeline needs around the daemon connection:
// registry credentials, deployment tags and Dockerfile discovery.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::BuilderConfig;

/// Docker Hub's auth config key
pub const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Docker engine auth config (the `X-Registry-Auth` payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    #[serde(rename = "serveraddress")]
    pub server_address: String,
}

/// Credentials for the platform registry
pub fn registry_auth(config: &BuilderConfig) -> AuthConfig {
    AuthConfig {
        username: "x".to_string(),
        password: config.api_token.clone(),
        server_address: config.registry_host.clone(),
    }
}

/// Registry auth encoded for the `X-Registry-Auth` header
///
/// Returns an empty string (and logs) if encoding fails.
pub fn encoded_registry_auth(config: &BuilderConfig) -> String {
    match serde_json::to_vec(&registry_auth(config)) {
        Ok(json) => URL_SAFE.encode(json),
        Err(e) => {
            warn!("Error encoding registry credentials: {}", e);
            String::new()
        }
    }
}

/// Extra registry credentials passed to builds
///
/// Docker Hub is included only when both username and password are set.
pub fn auth_configs(config: &BuilderConfig) -> HashMap<String, AuthConfig> {
    let mut configs = HashMap::new();

    if let (Some(username), Some(password)) = (
        config.docker_hub_username.as_deref().filter(|u| !u.is_empty()),
        config.docker_hub_password.as_deref().filter(|p| !p.is_empty()),
    ) {
        configs.insert(
            DOCKER_HUB_AUTH_KEY.to_string(),
            AuthConfig {
                username: username.to_string(),
                password: password.to_string(),
                server_address: "index.docker.io".to_string(),
            },
        );
    }

    configs
}

/// Image tag for a deployment: `<registry>/<app>:<label>`
///
/// A configured image ref wins outright. An empty label becomes
/// `deployment-<unix seconds>`.
pub fn new_deployment_tag(config: &BuilderConfig, app_name: &str, label: &str) -> String {
    if let Some(image) = config.image_ref.as_deref().filter(|i| !i.is_empty()) {
        return image.to_string();
    }

    let label = if label.is_empty() {
        format!("deployment-{}", chrono::Utc::now().timestamp())
    } else {
        label.to_string()
    };

    format!("{}/{}:{}", config.registry_host, app_name, label)
}

/// Find `Dockerfile` (or lowercase `dockerfile`) in a directory
pub fn resolve_dockerfile(dir: &Path) -> Option<PathBuf> {
    ["Dockerfile", "dockerfile"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_auth_round_trips_through_header_encoding() {
        let config = BuilderConfig {
            api_token: "tok".into(),
            ..Default::default()
        };

        let encoded = encoded_registry_auth(&config);
        let decoded: serde_json::Value =
            serde_json::from_slice(&URL_SAFE.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded["username"], "x");
        assert_eq!(decoded["password"], "tok");
        assert_eq!(decoded["serveraddress"], "registry.fly.io");
    }

    #[test]
    fn test_docker_hub_needs_both_credentials() {
        let mut config = BuilderConfig {
            docker_hub_username: Some("me".into()),
            ..Default::default()
        };
        assert!(auth_configs(&config).is_empty());

        config.docker_hub_password = Some("pw".into());
        let configs = auth_configs(&config);
        assert_eq!(configs[DOCKER_HUB_AUTH_KEY].username, "me");
        assert_eq!(configs[DOCKER_HUB_AUTH_KEY].server_address, "index.docker.io");
    }

    #[test]
    fn test_deployment_tag() {
        let config = BuilderConfig::default();
        assert_eq!(
            new_deployment_tag(&config, "my-app", "v2"),
            "registry.fly.io/my-app:v2"
        );

        let generated = new_deployment_tag(&config, "my-app", "");
        assert!(generated.starts_with("registry.fly.io/my-app:deployment-"));
    }

    #[test]
    fn test_image_ref_override() {
        let config = BuilderConfig {
            image_ref: Some("example.com/pinned:1".into()),
            ..Default::default()
        };
        assert_eq!(new_deployment_tag(&config, "my-app", "v2"), "example.com/pinned:1");
    }

    #[test]
    fn test_resolve_dockerfile_prefers_capitalized() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(resolve_dockerfile(dir.path()).is_none());

        std::fs::write(dir.path().join("dockerfile"), "FROM scratch").unwrap();
        assert_eq!(
            resolve_dockerfile(dir.path()).unwrap().file_name().unwrap(),
            "dockerfile"
        );

        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        // Case-insensitive filesystems resolve both names to the same file
        let found = resolve_dockerfile(dir.path()).unwrap();
        assert!(found.is_file());
    }
}
