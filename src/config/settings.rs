// Configuration structs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the local daemon fails for a reason other than absence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalFallbackPolicy {
    /// Log a warning and try the remote daemon anyway
    #[default]
    Always,
    /// Only fall through when no local daemon is present at all
    WhenAbsent,
}

/// Tuning for the readiness poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    #[serde(with = "millis")]
    pub min_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
    /// Continuous healthy time required before the daemon counts as ready
    #[serde(with = "millis")]
    pub stability_window: Duration,
    /// Hard bound on the whole readiness wait
    #[serde(with = "millis")]
    pub deadline: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            backoff_factor: 1.2,
            jitter: true,
            stability_window: Duration::from_secs(3),
            deadline: Duration::from_secs(5 * 60),
        }
    }
}

/// Builder connection settings, resolved once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Platform API base URL (GraphQL lives at `<base>/graphql`)
    pub api_base_url: String,

    /// Platform API token, also used for builder auth
    pub api_token: String,

    /// Use this endpoint verbatim instead of provisioning a builder
    pub remote_builder_host: Option<String>,

    /// Speak plain HTTP to the remote builder
    pub remote_builder_no_tls: bool,

    /// Static image reference overriding generated deployment tags
    pub image_ref: Option<String>,

    pub docker_hub_username: Option<String>,
    pub docker_hub_password: Option<String>,

    /// Registry host used for deployment tags and registry auth
    pub registry_host: String,

    /// Local daemon address (`unix://...` or `tcp://...`)
    pub local_docker_host: String,

    pub local_fallback: LocalFallbackPolicy,

    /// Bound on waiting for the remote instance to report running
    #[serde(with = "millis")]
    pub instance_start_timeout: Duration,

    pub readiness: ReadinessConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.fly.io".to_string(),
            api_token: String::new(),
            remote_builder_host: None,
            remote_builder_no_tls: false,
            image_ref: None,
            docker_hub_username: None,
            docker_hub_password: None,
            registry_host: "registry.fly.io".to_string(),
            local_docker_host: default_local_host().to_string(),
            local_fallback: LocalFallbackPolicy::Always,
            instance_start_timeout: Duration::from_secs(5 * 60),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl BuilderConfig {
    /// Copy of the config safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_token.is_empty() {
            copy.api_token = "<redacted>".to_string();
        }
        if copy.docker_hub_password.is_some() {
            copy.docker_hub_password = Some("<redacted>".to_string());
        }
        copy
    }
}

#[cfg(target_family = "unix")]
fn default_local_host() -> &'static str {
    "unix:///var/run/docker.sock"
}

#[cfg(not(target_family = "unix"))]
fn default_local_host() -> &'static str {
    "tcp://127.0.0.1:2375"
}

/// Durations are stored as integer milliseconds in config.toml
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
