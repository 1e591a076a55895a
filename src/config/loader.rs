// Configuration loader
// Loads builder settings from ~/.remote-builder/config.toml, then applies
// environment overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::settings::{BuilderConfig, LocalFallbackPolicy};

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".remote-builder").join("config.toml"))
}

/// Load configuration from the default file (if present) and the process environment
pub fn load_config() -> Result<BuilderConfig> {
    let mut config = match default_config_path() {
        Some(path) if path.exists() => load_config_from(&path)?,
        _ => BuilderConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from an explicit TOML file, without environment overrides
pub fn load_config_from(path: &Path) -> Result<BuilderConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: BuilderConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    debug!(path = %path.display(), "Loaded builder config");
    Ok(config)
}

/// Apply environment overrides on top of file/default settings
///
/// `lookup` abstracts the environment so tests don't mutate process state.
/// Empty values are treated as unset.
pub fn apply_env_overrides<F>(config: &mut BuilderConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(token) = get("FLY_API_TOKEN") {
        config.api_token = token;
    }
    if let Some(base) = get("FLY_API_BASE_URL") {
        config.api_base_url = base;
    }
    if let Some(host) = get("FLY_REMOTE_BUILDER_HOST") {
        config.remote_builder_host = Some(host);
    }
    if let Some(v) = get("FLY_REMOTE_BUILDER_NO_TLS") {
        config.remote_builder_no_tls = v == "1";
    }
    if let Some(image) = get("FLY_IMAGE_REF") {
        config.image_ref = Some(image);
    }
    if let Some(user) = get("DOCKER_HUB_USERNAME") {
        config.docker_hub_username = Some(user);
    }
    if let Some(pass) = get("DOCKER_HUB_PASSWORD") {
        config.docker_hub_password = Some(pass);
    }
    if let Some(host) = get("DOCKER_HOST") {
        config.local_docker_host = host;
    }
    if let Some(policy) = get("FLY_LOCAL_FALLBACK") {
        match policy.as_str() {
            "always" => config.local_fallback = LocalFallbackPolicy::Always,
            "when-absent" => config.local_fallback = LocalFallbackPolicy::WhenAbsent,
            other => debug!(value = other, "Ignoring unknown FLY_LOCAL_FALLBACK value"),
        }
    }
}
