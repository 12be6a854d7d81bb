//! Service-identity tokens via the OAuth2 client-credentials grant

use oauth2::TokenResponse;
use tokio::sync::Mutex;

use super::client::{self, EntraClient};
use super::tokens::AccessToken;
use super::{AuthConfig, AuthError, Result};

struct CachedToken {
    resource: String,
    token: AccessToken,
}

/// Exchanges the configured client secret for short-lived tokens.
///
/// The token lives in memory only; the secret itself is the durable credential.
pub struct ClientCredentialsProvider {
    client: EntraClient,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    pub fn new(auth_config: &AuthConfig) -> Result<Self> {
        if auth_config.client_secret.is_none() {
            return Err(AuthError::Configuration(
                "client-credentials auth needs a client secret".to_string(),
            ));
        }

        Ok(Self {
            client: client::build_client(auth_config)?,
            cached: Mutex::new(None),
        })
    }

    pub async fn get_access_token(&self, resource: &str) -> Result<AccessToken> {
        // Held across the exchange so concurrent callers share one request.
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.resource == resource && !entry.token.is_expired() {
                return Ok(entry.token.clone());
            }
        }

        tracing::info!("Requesting client-credentials token for {}", resource);
        let response = self
            .client
            .exchange_client_credentials()
            .add_scope(client::default_scope(resource))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| {
                let failure = client::token_failure(e);
                tracing::warn!(
                    "Client-credentials exchange failed: {} {}",
                    failure.code,
                    failure.description
                );
                AuthError::AuthenticationFailed {
                    code: failure.code,
                    description: failure.description,
                }
            })?;

        let token = AccessToken::new(
            response.access_token().secret().to_string(),
            response.expires_in().map(|d| d.as_secs()),
        );
        tracing::debug!("Client-credentials token expires at {}", token.expires_at);

        *cached = Some(CachedToken {
            resource: resource.to_string(),
            token: token.clone(),
        });
        Ok(token)
    }
}
