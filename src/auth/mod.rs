//! Authentication gateway for PowerPlatform
//!
//! Picks one of two strategies at construction time: a client-credentials
//! grant when a client secret is configured, otherwise interactive browser
//! sign-in backed by the encrypted token cache.

pub mod client;
pub mod error;
pub mod interactive;
pub mod listener;
pub mod pages;
pub mod service;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{AuthError, Result};
pub use interactive::{BrowserLauncher, InteractiveProvider};
pub use service::ClientCredentialsProvider;
pub use tokens::{AccessToken, Account};

use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// How long the loopback listener waits for the browser to come back.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Validated Azure AD client configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID
    pub client_id: String,
    /// Azure AD tenant
    pub tenant: String,
    /// Present for confidential (service-identity) clients
    pub client_secret: Option<String>,
    pub authority_host: String,
    /// Directory for the encrypted token cache
    pub cache_dir: PathBuf,
    pub callback_timeout: Duration,
}

impl AuthConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client_id = required(config.client_id.as_deref(), "client ID (POWERPLATFORM_CLIENT_ID)")?;
        let tenant = required(config.tenant_id.as_deref(), "tenant ID (POWERPLATFORM_TENANT_ID)")?;

        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => Config::default_cache_dir()
                .map_err(|e| AuthError::Configuration(format!("{:#}", e)))?,
        };

        Ok(Self {
            client_id,
            tenant,
            client_secret: config
                .has_client_secret()
                .then(|| config.client_secret.clone())
                .flatten(),
            authority_host: config
                .authority_host
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            cache_dir,
            callback_timeout: config
                .callback_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CALLBACK_TIMEOUT),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.authority_host.trim_end_matches('/'),
            self.tenant,
            name
        )
    }

    pub fn authorize_endpoint(&self) -> String {
        self.endpoint("authorize")
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("token")
    }

    #[cfg(test)]
    pub(crate) fn for_tests(authority_host: &str) -> Self {
        Self {
            client_id: test_support::CLIENT_ID.to_string(),
            tenant: test_support::TENANT.to_string(),
            client_secret: None,
            authority_host: authority_host.to_string(),
            cache_dir: std::env::temp_dir(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("tenant", &self.tenant)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authority_host", &self.authority_host)
            .field("cache_dir", &self.cache_dir)
            .field("callback_timeout", &self.callback_timeout)
            .finish()
    }
}

fn required(value: Option<&str>, what: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AuthError::Configuration(format!("missing {}", what))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Client-credentials grant with a client secret
    ServiceIdentity,
    /// Browser sign-in by a human user
    Interactive,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceIdentity => f.write_str("service-identity"),
            Self::Interactive => f.write_str("interactive"),
        }
    }
}

/// The token source every API client goes through.
pub enum AuthProvider {
    ServiceIdentity(ClientCredentialsProvider),
    Interactive(InteractiveProvider),
}

impl AuthProvider {
    /// Service identity when a client secret is configured, interactive otherwise.
    pub fn from_config(config: &Config) -> Result<Self> {
        let auth_config = AuthConfig::from_config(config)?;
        Self::from_auth_config(&auth_config)
    }

    pub fn from_auth_config(auth_config: &AuthConfig) -> Result<Self> {
        let provider = if auth_config.client_secret.is_some() {
            Self::ServiceIdentity(ClientCredentialsProvider::new(auth_config)?)
        } else {
            Self::Interactive(InteractiveProvider::new(auth_config)?)
        };
        tracing::debug!("Using {} authentication", provider.auth_mode());
        Ok(provider)
    }

    pub fn auth_mode(&self) -> AuthMode {
        match self {
            Self::ServiceIdentity(_) => AuthMode::ServiceIdentity,
            Self::Interactive(_) => AuthMode::Interactive,
        }
    }

    /// Access token for `resource`, valid for at least the refresh margin.
    pub async fn get_access_token(&self, resource: &str) -> Result<AccessToken> {
        match self {
            Self::ServiceIdentity(p) => p.get_access_token(resource).await,
            Self::Interactive(p) => p.get_access_token(resource).await,
        }
    }

    /// Signed-in account; always `None` for a service identity.
    pub async fn user_info(&self) -> Option<Account> {
        match self {
            Self::ServiceIdentity(_) => None,
            Self::Interactive(p) => p.user_info().await,
        }
    }

    /// Sign out. Nothing is persisted for a service identity, so this is a no-op there.
    pub fn clear_cache(&self) -> Result<()> {
        match self {
            Self::ServiceIdentity(_) => Ok(()),
            Self::Interactive(p) => p.clear_cache(),
        }
    }

    pub fn cache_exists(&self) -> bool {
        match self {
            Self::ServiceIdentity(_) => false,
            Self::Interactive(p) => p.cache_exists(),
        }
    }
}
