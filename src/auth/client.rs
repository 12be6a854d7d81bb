//! OAuth2 client plumbing shared by both providers

use base64::Engine;
use oauth2::basic::{
    BasicErrorResponse, BasicErrorResponseType, BasicRevocationErrorResponse,
    BasicTokenIntrospectionResponse, BasicTokenType,
};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, ExtraTokenFields, RequestTokenError, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};

use super::tokens::Account;
use super::{AuthConfig, AuthError, Result};

/// OpenID fields Azure AD adds to the token response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

pub type EntraTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

pub type EntraClient = oauth2::Client<
    BasicErrorResponse,
    EntraTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Build the OAuth2 client from an AuthConfig
pub fn build_client(auth_config: &AuthConfig) -> Result<EntraClient> {
    let auth_url = AuthUrl::new(auth_config.authorize_endpoint())
        .map_err(|e| AuthError::Configuration(format!("invalid authority: {}", e)))?;
    let token_url = TokenUrl::new(auth_config.token_endpoint())
        .map_err(|e| AuthError::Configuration(format!("invalid authority: {}", e)))?;

    let client = EntraClient::new(
        ClientId::new(auth_config.client_id.clone()),
        auth_config.client_secret.clone().map(ClientSecret::new),
        auth_url,
        Some(token_url),
    );

    // Azure AD accepts client_secret in the form body for confidential clients.
    Ok(client.set_auth_type(oauth2::AuthType::RequestBody))
}

/// `<resource>/.default`, the scope that requests every permission granted for the resource.
pub fn default_scope(resource: &str) -> Scope {
    Scope::new(format!("{}/.default", resource.trim_end_matches('/')))
}

/// Scopes requested by the interactive flow.
pub fn interactive_scopes(resource: &str) -> Vec<Scope> {
    vec![
        default_scope(resource),
        Scope::new("offline_access".to_string()),
        Scope::new("openid".to_string()),
        Scope::new("profile".to_string()),
    ]
}

/// Failure of a token endpoint request, reduced to what callers act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFailure {
    pub code: String,
    pub description: String,
}

impl TokenFailure {
    /// The session behind a refresh token is gone and only a new sign-in helps.
    pub fn requires_interaction(&self) -> bool {
        matches!(
            self.code.as_str(),
            "invalid_grant" | "interaction_required" | "login_required" | "consent_required"
        )
    }
}

pub fn token_failure<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> TokenFailure
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(resp) => TokenFailure {
            code: error_code(resp.error()),
            description: resp
                .error_description()
                .cloned()
                .unwrap_or_else(|| "no description provided".to_string()),
        },
        RequestTokenError::Request(e) => TokenFailure {
            code: "request_failed".to_string(),
            description: e.to_string(),
        },
        RequestTokenError::Parse(e, _) => TokenFailure {
            code: "invalid_response".to_string(),
            description: e.to_string(),
        },
        RequestTokenError::Other(msg) => TokenFailure {
            code: "unknown_error".to_string(),
            description: msg,
        },
    }
}

fn error_code(kind: &BasicErrorResponseType) -> String {
    match kind {
        BasicErrorResponseType::InvalidClient => "invalid_client".to_string(),
        BasicErrorResponseType::InvalidGrant => "invalid_grant".to_string(),
        BasicErrorResponseType::InvalidRequest => "invalid_request".to_string(),
        BasicErrorResponseType::InvalidScope => "invalid_scope".to_string(),
        BasicErrorResponseType::UnauthorizedClient => "unauthorized_client".to_string(),
        BasicErrorResponseType::UnsupportedGrantType => "unsupported_grant_type".to_string(),
        BasicErrorResponseType::Extension(other) => other.clone(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    tid: Option<String>,
    name: Option<String>,
    preferred_username: Option<String>,
    upn: Option<String>,
    email: Option<String>,
}

/// Read the account out of an id_token.
///
/// The token came straight from the token endpoint over TLS, so the claims
/// are decoded without signature verification.
pub fn account_from_id_token(id_token: &str) -> Option<Account> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;

    let local_id = claims.oid.or(claims.sub)?;
    let home_account_id = match &claims.tid {
        Some(tid) => format!("{}.{}", local_id, tid),
        None => local_id,
    };
    let username = claims
        .preferred_username
        .or(claims.upn)
        .or(claims.email)
        .unwrap_or_else(|| home_account_id.clone());

    Some(Account {
        home_account_id,
        username,
        name: claims.name,
        tenant_id: claims.tid,
    })
}
