//! Interactive sign-in: silent refresh from the encrypted cache, falling back
//! to a browser authorization-code flow through a loopback listener.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use oauth2::{
    AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl,
    RefreshToken, TokenResponse,
};
use tokio::sync::Mutex;

use super::client::{self, EntraClient, EntraTokenResponse};
use super::listener::{Callback, CallbackListener};
use super::pages::Page;
use super::tokens::{AccessToken, Account};
use super::{AuthConfig, AuthError, Result};
use crate::cache::{CacheState, TokenCache};

/// Opens the authorization URL for the user.
pub type BrowserLauncher = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Launch the system default browser.
pub fn system_browser() -> BrowserLauncher {
    Arc::new(|url: &str| open::that(url))
}

pub struct InteractiveProvider {
    client: EntraClient,
    cache: Arc<TokenCache>,
    account: StdMutex<Option<Account>>,
    /// One sign-in flow at a time per provider.
    flow: Mutex<()>,
    callback_timeout: Duration,
    browser: BrowserLauncher,
}

impl InteractiveProvider {
    pub fn new(auth_config: &AuthConfig) -> Result<Self> {
        let cache = TokenCache::new(&auth_config.cache_dir, &auth_config.client_id);
        Self::with_cache(auth_config, cache)
    }

    pub fn with_cache(auth_config: &AuthConfig, cache: TokenCache) -> Result<Self> {
        Ok(Self {
            client: client::build_client(auth_config)?,
            cache: Arc::new(cache),
            account: StdMutex::new(None),
            flow: Mutex::new(()),
            callback_timeout: auth_config.callback_timeout,
            browser: system_browser(),
        })
    }

    pub fn with_browser(mut self, browser: BrowserLauncher) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub async fn get_access_token(&self, resource: &str) -> Result<AccessToken> {
        let _flow = self.flow.lock().await;
        let mut state = self.load_state().await;

        let silent = self.acquire_silent(&mut state, resource).await;
        self.save(&mut state).await;
        match silent {
            Ok(token) => return Ok(token),
            Err(AuthError::InteractionRequired(reason)) => {
                tracing::info!("Interactive sign-in required: {}", reason);
            }
            Err(e) => return Err(e),
        }

        self.acquire_interactive(&mut state, resource).await
    }

    /// Serve from cache or redeem the cached refresh token.
    async fn acquire_silent(
        &self,
        state: &mut CacheState,
        resource: &str,
    ) -> Result<AccessToken> {
        let Some(account) = state.accounts().next().cloned() else {
            return Err(AuthError::InteractionRequired("no cached account".to_string()));
        };

        if let Some(token) = state.valid_access_token(&account.home_account_id, resource) {
            tracing::debug!("Using cached token for {} ({})", resource, account.username);
            self.remember(account);
            return Ok(token);
        }

        let refresh_token = state
            .record(&account.home_account_id)
            .and_then(|r| r.refresh_token.clone())
            .ok_or_else(|| {
                AuthError::InteractionRequired("no refresh token for cached account".to_string())
            })?;

        tracing::info!("Refreshing token for {} ({})", resource, account.username);
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .add_scopes(client::interactive_scopes(resource))
            .request_async(oauth2::reqwest::async_http_client)
            .await;

        match response {
            Ok(response) => {
                let (account, refresh_token, token) = read_response(&response, Some(&account));
                state.upsert(account.clone(), refresh_token, resource, token.clone());
                self.remember(account);
                Ok(token)
            }
            Err(e) => {
                let failure = client::token_failure(e);
                if failure.requires_interaction() {
                    state.remove_account(&account.home_account_id);
                    Err(AuthError::InteractionRequired(format!(
                        "{}: {}",
                        failure.code, failure.description
                    )))
                } else {
                    Err(AuthError::AuthenticationFailed {
                        code: failure.code,
                        description: failure.description,
                    })
                }
            }
        }
    }

    async fn acquire_interactive(
        &self,
        state: &mut CacheState,
        resource: &str,
    ) -> Result<AccessToken> {
        let listener = CallbackListener::bind().await?;
        let redirect_uri = RedirectUrl::new(listener.redirect_uri())
            .map_err(|e| AuthError::AuthorizationUrl(e.to_string()))?;
        let oauth = self.client.clone().set_redirect_uri(redirect_uri);

        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf) = oauth
            .authorize_url(CsrfToken::new_random)
            .add_scopes(client::interactive_scopes(resource))
            .set_pkce_challenge(challenge)
            .add_extra_param("prompt", "select_account")
            .url();

        self.open_browser(auth_url.as_str());

        let outcome = tokio::time::timeout(
            self.callback_timeout,
            self.complete_sign_in(&listener, &oauth, verifier, state, resource),
        )
        .await;
        drop(listener);

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "No sign-in callback within {}s, giving up",
                    self.callback_timeout.as_secs()
                );
                Err(AuthError::AuthenticationTimedOut(self.callback_timeout))
            }
        }
    }

    async fn complete_sign_in(
        &self,
        listener: &CallbackListener,
        oauth: &EntraClient,
        verifier: PkceCodeVerifier,
        state: &mut CacheState,
        resource: &str,
    ) -> Result<AccessToken> {
        let (pending, callback) = listener.next_callback().await?;

        let code = match callback {
            Callback::Error { code, description } => {
                tracing::warn!("Sign-in rejected by identity provider: {} {}", code, description);
                pending
                    .respond(Page::Error {
                        code: code.clone(),
                        description: description.clone(),
                    })
                    .await;
                return Err(AuthError::AuthenticationFailed { code, description });
            }
            Callback::Code(code) => code,
        };

        let scope = client::interactive_scopes(resource)
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let response = oauth
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .add_extra_param("scope", scope)
            .request_async(oauth2::reqwest::async_http_client)
            .await;

        match response {
            Ok(response) => {
                let (account, refresh_token, token) = read_response(&response, None);
                tracing::info!("Signed in as {}", account.username);
                state.upsert(account.clone(), refresh_token, resource, token.clone());
                self.save(state).await;
                self.remember(account);
                pending.respond(Page::Success).await;
                Ok(token)
            }
            Err(e) => {
                let failure = client::token_failure(e);
                tracing::warn!(
                    "Authorization code exchange failed: {} {}",
                    failure.code,
                    failure.description
                );
                pending
                    .respond(Page::Error {
                        code: failure.code.clone(),
                        description: failure.description.clone(),
                    })
                    .await;
                Err(AuthError::TokenExchangeFailed {
                    code: failure.code,
                    description: failure.description,
                })
            }
        }
    }

    fn open_browser(&self, url: &str) {
        tracing::info!("Opening browser for sign-in");
        tracing::debug!("Authorization URL: {}", url);
        eprintln!();
        eprintln!("To sign in, visit: {}", url);
        eprintln!();

        if let Err(e) = (self.browser)(url) {
            tracing::warn!(
                "Could not launch browser ({}); open the URL above manually",
                e
            );
        }
    }

    /// Key derivation and file I/O run on the blocking pool.
    async fn load_state(&self) -> CacheState {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || cache.load())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Token cache load task failed: {}", e);
                CacheState::default()
            })
    }

    /// A failed write only costs a future sign-in, so it does not fail the call.
    async fn save(&self, state: &mut CacheState) {
        if !state.has_changed() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let mut snapshot = state.clone();
        match tokio::task::spawn_blocking(move || cache.persist(&mut snapshot)).await {
            Ok(Ok(())) => state.mark_clean(),
            Ok(Err(e)) => tracing::warn!("{}", e),
            Err(e) => tracing::warn!("Token cache persist task failed: {}", e),
        }
    }

    fn remember(&self, account: Account) {
        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = Some(account);
    }

    /// Most recently signed-in account, falling back to the most recently
    /// used account in the cache.
    pub async fn user_info(&self) -> Option<Account> {
        if let Some(account) = self.held_account() {
            return Some(account);
        }
        let cached = self.load_state().await.accounts().next().cloned()?;
        let mut held = self.account.lock().unwrap_or_else(|e| e.into_inner());
        Some(held.get_or_insert(cached).clone())
    }

    fn held_account(&self) -> Option<Account> {
        self.account.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sign out: delete the cache file and forget the account.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()?;
        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    pub fn cache_exists(&self) -> bool {
        self.cache.exists()
    }
}

/// Account, rotated refresh token and access token from a token response.
fn read_response(
    response: &EntraTokenResponse,
    previous: Option<&Account>,
) -> (Account, Option<String>, AccessToken) {
    let account = response
        .extra_fields()
        .id_token
        .as_deref()
        .and_then(client::account_from_id_token)
        .or_else(|| previous.cloned())
        .unwrap_or_else(|| {
            tracing::warn!("Token response carried no usable id_token");
            Account {
                home_account_id: "default".to_string(),
                username: "unknown".to_string(),
                name: None,
                tenant_id: None,
            }
        });

    let token = AccessToken::new(
        response.access_token().secret().to_string(),
        response.expires_in().map(|d| d.as_secs()),
    );
    let refresh_token = response.refresh_token().map(|rt| rt.secret().to_string());

    (account, refresh_token, token)
}
