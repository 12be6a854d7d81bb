//! Configuration loading: TOML file overlaid with environment variables

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

pub const ENV_ORGANIZATION_URL: &str = "POWERPLATFORM_URL";
pub const ENV_CLIENT_ID: &str = "POWERPLATFORM_CLIENT_ID";
pub const ENV_TENANT_ID: &str = "POWERPLATFORM_TENANT_ID";
pub const ENV_CLIENT_SECRET: &str = "POWERPLATFORM_CLIENT_SECRET";
pub const ENV_AUTHORITY_HOST: &str = "POWERPLATFORM_AUTHORITY_HOST";
pub const ENV_TOKEN_CACHE_DIR: &str = "POWERPLATFORM_TOKEN_CACHE_DIR";
pub const ENV_AUTH_TIMEOUT_SECS: &str = "POWERPLATFORM_AUTH_TIMEOUT_SECS";

/// Application configuration
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    /// Organization (Dataverse environment) URL, the default token resource
    pub organization_url: Option<String>,
    /// Azure AD application (client) ID
    pub client_id: Option<String>,
    /// Azure AD tenant ID
    pub tenant_id: Option<String>,
    /// Client secret; when set, service-identity auth is used
    pub client_secret: Option<String>,
    /// Identity provider host (defaults to https://login.microsoftonline.com)
    pub authority_host: Option<String>,
    /// Directory holding the encrypted token cache
    pub cache_dir: Option<PathBuf>,
    /// Seconds to wait for the browser sign-in to finish
    pub callback_timeout_secs: Option<u64>,
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "powerplatform-mcp", "powerplatform-mcp")
            .context("Could not determine home directory")
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Per-user data directory used when no cache directory is configured.
    pub fn default_cache_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_local_dir().to_path_buf())
    }

    /// Load the config file (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Override fields from `lookup`; empty values count as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_ORGANIZATION_URL) {
            self.organization_url = Some(v);
        }
        if let Some(v) = get(ENV_CLIENT_ID) {
            self.client_id = Some(v);
        }
        if let Some(v) = get(ENV_TENANT_ID) {
            self.tenant_id = Some(v);
        }
        if let Some(v) = get(ENV_CLIENT_SECRET) {
            self.client_secret = Some(v);
        }
        if let Some(v) = get(ENV_AUTHORITY_HOST) {
            self.authority_host = Some(v);
        }
        if let Some(v) = get(ENV_TOKEN_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_AUTH_TIMEOUT_SECS) {
            let secs = v
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds", ENV_AUTH_TIMEOUT_SECS))?;
            self.callback_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// True when a non-empty client secret selects service-identity auth.
    pub fn has_client_secret(&self) -> bool {
        self.client_secret
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}
